//! Chunk artifact persistence.
//!
//! Each chunk writes one self-describing artifact per section runtype: a
//! metadata block, then each operator block in the fixed generation
//! order, then the four dimension blocks. Blocks are appended as they
//! are computed and the operator released immediately afterwards, which
//! is what bounds peak memory. The writer stages everything in a
//! `.part` file and renames it only on [`ChunkWriter::finalize`], so an
//! aborted chunk never leaves a finalized artifact behind.

use crate::chunk::ChunkSpec;
use crate::elevation::Indexing;
use crate::errors::IcegridResult;
use crate::grid::GridSpec;
use crate::operator::WeightedOperator;
use crate::sparse::SparseDim;
use serde::{Deserialize, Serialize};
use std::fs::{remove_file, rename, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// One block of a chunk artifact.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "block", rename_all = "snake_case")]
pub enum ArtifactBlock {
    Metadata {
        /// Section runtype ("standard" or "mismatched")
        runtype: String,
        chunk: ChunkSpec,
        grid_a: GridSpec,
        grid_i: GridSpec,
        grid_i2: GridSpec,
        hcdefs: Vec<f64>,
        indexing: Indexing,
        scale: bool,
    },
    Operator {
        name: String,
        /// Names of the (dest, source) dimension blocks
        dims: [String; 2],
        op: WeightedOperator,
    },
    Dim {
        name: String,
        /// Full grid shape behind the sparse ids
        shape: Vec<usize>,
        description: String,
        dim: SparseDim,
    },
}

/// Append-only writer for one chunk artifact.
pub struct ChunkWriter {
    out: BufWriter<File>,
    partial: PathBuf,
    path: PathBuf,
    finalized: bool,
}

impl ChunkWriter {
    pub fn create(path: PathBuf) -> IcegridResult<Self> {
        // Not `with_extension`: the output name may itself contain dots
        let partial = PathBuf::from(format!("{}.part", path.display()));
        let out = BufWriter::new(File::create(&partial)?);
        Ok(Self {
            out,
            partial,
            path,
            finalized: false,
        })
    }

    /// Append one block and flush it to disk.
    pub fn write_block(&mut self, block: &ArtifactBlock) -> IcegridResult<()> {
        serde_json::to_writer(&mut self.out, block)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    pub fn write_operator(
        &mut self,
        name: &str,
        dims: [&str; 2],
        op: &WeightedOperator,
    ) -> IcegridResult<()> {
        log::info!("writing {name} ({} entries)", op.m.len());
        self.write_block(&ArtifactBlock::Operator {
            name: name.to_string(),
            dims: [dims[0].to_string(), dims[1].to_string()],
            op: op.clone(),
        })
    }

    pub fn write_dim(
        &mut self,
        name: &str,
        shape: &[usize],
        description: &str,
        dim: &SparseDim,
    ) -> IcegridResult<()> {
        self.write_block(&ArtifactBlock::Dim {
            name: name.to_string(),
            shape: shape.to_vec(),
            description: description.to_string(),
            dim: dim.clone(),
        })
    }

    /// Rename the staged file to its final name. Only call once every
    /// block of the chunk has been written.
    pub fn finalize(mut self) -> IcegridResult<PathBuf> {
        self.out.flush()?;
        rename(&self.partial, &self.path)?;
        self.finalized = true;
        Ok(self.path.clone())
    }
}

impl Drop for ChunkWriter {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = remove_file(&self.partial);
        }
    }
}

/// Reload a finalized chunk artifact (combiner and round-trip tests).
pub fn read_chunk_artifact(path: &Path) -> IcegridResult<Vec<ArtifactBlock>> {
    let file = File::open(path)?;
    let mut blocks = Vec::new();
    for line in BufReader::new(file).lines() {
        let mut block: ArtifactBlock = serde_json::from_str(&line?)?;
        if let ArtifactBlock::Dim { dim, .. } = &mut block {
            dim.rebuild_index();
        }
        blocks.push(block);
    }
    Ok(blocks)
}
