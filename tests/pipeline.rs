//! End-to-end tests for the chunked operator pipeline.
//!
//! These tests verify the conservation laws the operators must satisfy:
//! - conservative operators preserve total area-weighted mass
//! - scaled operators have rows summing to one
//! - display downsampling preserves column totals
//!
//! The scene is small enough to reason about by hand: a 4x4 ocean grid
//! over an 8x8 ice grid with two iced 2x2 blocks, one at an exact class
//! elevation and one halfway between two classes.

use approx::assert_relative_eq;
use ndarray::Array2;
use std::collections::HashSet;

use icegrid::chunk::{chunk_validity_mask, plan_chunks, write_chunk_makefile, ChunkParams, ChunkSpec};
use icegrid::exchange::SilentProgress;
use icegrid::grid::{GridSpec, EQ_RAD};
use icegrid::input::fgice_to_ocean;
use icegrid::operator::{downsample_display, Triplet, WeightedOperator};
use icegrid::output::{read_chunk_artifact, ArtifactBlock, ChunkWriter};
use icegrid::regrid::{
    assemble_standard, display_overlap, GcmRegridder, MismatchedRegridder, OperatorKind,
    RegridParams, GENERATION_ORDER,
};
use icegrid::sparse::SparseDim;

const HCDEFS: [f64; 3] = [0.0, 500.0, 1000.0];

fn grids() -> (GridSpec, GridSpec, GridSpec) {
    (
        GridSpec::new("ocean", 4, 4),
        GridSpec::new("ice", 8, 8),
        GridSpec::new("display", 4, 4),
    )
}

/// Two iced 2x2 fine blocks: under ocean cell (1,1) at 500 m (exactly on
/// class 1) and under ocean cell (2,2) at 250 m (split between classes
/// 0 and 1).
fn ice_scene() -> (Array2<f64>, Array2<f64>) {
    let mut fgice_i = Array2::zeros((8, 8));
    let mut elev_i = Array2::zeros((8, 8));
    for j in 2..4 {
        for i in 2..4 {
            fgice_i[[j, i]] = 1.0;
            elev_i[[j, i]] = 500.0;
        }
    }
    for j in 4..6 {
        for i in 4..6 {
            fgice_i[[j, i]] = 1.0;
            elev_i[[j, i]] = 250.0;
        }
    }
    (fgice_i, elev_i)
}

/// Validity mask of the whole-grid chunk.
fn global_mask(grid_o: &GridSpec, grid_i: &GridSpec) -> Array2<f64> {
    let (fgice_i, elev_i) = ice_scene();
    let fgice_o = fgice_to_ocean(grid_o, grid_i, fgice_i.view(), EQ_RAD).unwrap();
    let chunk = ChunkSpec {
        id: 0,
        start: (0, 0),
        end: (grid_o.jm, 0),
    };
    chunk_validity_mask(
        &chunk,
        grid_o,
        grid_i,
        fgice_o.view(),
        fgice_i.view(),
        elev_i.view(),
    )
    .unwrap()
}

fn ocean_regridder(elevmask: &Array2<f64>, scale: bool) -> GcmRegridder {
    let (grid_o, grid_i, _) = grids();
    assemble_standard(
        "Ocean",
        &grid_o,
        &grid_i,
        &HCDEFS,
        elevmask.view(),
        &RegridParams {
            scale,
            eq_rad: EQ_RAD,
        },
        SilentProgress,
    )
    .unwrap()
}

/// Total area of the iced fine cells, the conserved quantity.
fn total_ice_area(grid_i: &GridSpec, elevmask: &Array2<f64>) -> f64 {
    elevmask
        .indexed_iter()
        .filter(|(_, v)| !v.is_nan())
        .map(|((j, _), _)| grid_i.cell_area(j, EQ_RAD))
        .sum()
}

/// All seven operators of one section, generated in the fixed order with
/// shared dimension registries: the five directed operators plus the
/// display companions following IvE and IvA.
struct Section {
    ops: Vec<(String, WeightedOperator)>,
    dim_a: SparseDim,
    dim_i: SparseDim,
    dim_e: SparseDim,
    dim_i2: SparseDim,
}

fn generate_section(gcm: &GcmRegridder, elevmask: &Array2<f64>, scale: bool) -> Section {
    let (_, grid_i, grid_i2) = grids();
    let params = RegridParams {
        scale,
        eq_rad: EQ_RAD,
    };
    let rm = gcm.regrid_matrices(elevmask.view());

    let mut dim_a = SparseDim::new(gcm.grid_a.ncells());
    let mut dim_i = SparseDim::new(grid_i.ncells());
    let mut dim_e = SparseDim::new(gcm.indexing.extent());
    let mut dim_i2 = SparseDim::new(grid_i2.ncells());
    let mut i2vi: Option<Vec<Triplet>> = None;

    let mut ops = Vec::new();
    for kind in GENERATION_ORDER {
        let op = match kind {
            OperatorKind::AvI => rm.matrix(kind, &mut dim_a, &mut dim_i, &params),
            OperatorKind::EvI => rm.matrix(kind, &mut dim_e, &mut dim_i, &params),
            OperatorKind::IvE => rm.matrix(kind, &mut dim_i, &mut dim_e, &params),
            OperatorKind::IvA => rm.matrix(kind, &mut dim_i, &mut dim_a, &params),
            OperatorKind::AvE => rm.matrix(kind, &mut dim_a, &mut dim_e, &params),
        };
        ops.push((kind.to_string(), op));
        if matches!(kind, OperatorKind::IvE | OperatorKind::IvA) {
            let overlap = i2vi.get_or_insert_with(|| {
                display_overlap(&grid_i2, &grid_i, &dim_i, &mut dim_i2, EQ_RAD)
            });
            let ivx = &ops.last().unwrap().1;
            let small = downsample_display(ivx, overlap, dim_i2.dense_extent(), scale);
            let name = if kind == OperatorKind::IvE {
                "I2vE"
            } else {
                "I2vA"
            };
            ops.push((name.to_string(), small));
        }
    }
    Section {
        ops,
        dim_a,
        dim_i,
        dim_e,
        dim_i2,
    }
}

fn entry_sum(op: &WeightedOperator) -> f64 {
    op.m.iter().map(|&(_, _, v)| v).sum()
}

fn column_sums(op: &WeightedOperator) -> Vec<f64> {
    let mut sums = vec![0.0; op.ncols()];
    for &(_, c, v) in &op.m {
        sums[c] += v;
    }
    sums
}

mod conservation {
    use super::*;

    /// Every conservative operator carries the full iced area.
    #[test]
    fn test_conservative_operators_preserve_total_area() {
        let (_, grid_i, _) = grids();
        let (grid_o, _, _) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        let section = generate_section(&gcm, &mask, false);
        let expected = total_ice_area(&grid_i, &mask);

        for (name, op) in &section.ops {
            assert_relative_eq!(entry_sum(op), expected, max_relative = 1e-12);
            assert!(op.conservative, "{name} should be conservative");
        }
    }

    /// Downsampling a conservative operator to the display grid must not
    /// move mass between source cells.
    #[test]
    fn test_downsample_preserves_column_totals() {
        let (grid_o, grid_i, grid_i2) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        let params = RegridParams {
            scale: false,
            eq_rad: EQ_RAD,
        };
        let rm = gcm.regrid_matrices(mask.view());

        let mut dim_a = SparseDim::new(grid_o.ncells());
        let mut dim_i = SparseDim::new(grid_i.ncells());
        // AvI first so dimI is fully realized, as in the generation order
        let _ = rm.matrix(OperatorKind::AvI, &mut dim_a, &mut dim_i, &params);
        let iva = rm.matrix(OperatorKind::IvA, &mut dim_i, &mut dim_a, &params);

        let mut dim_i2 = SparseDim::new(grid_i2.ncells());
        let i2vi = display_overlap(&grid_i2, &grid_i, &dim_i, &mut dim_i2, EQ_RAD);
        let i2va = downsample_display(&iva, &i2vi, dim_i2.dense_extent(), false);

        let coarse = column_sums(&i2va);
        for (c, &fine) in column_sums(&iva).iter().enumerate() {
            assert_relative_eq!(coarse[c], fine, max_relative = 1e-12);
        }
    }

    /// When every display cell is a disjoint union of fine cells (the
    /// exact-aggregation case here), downsampling the conservative IvA
    /// operator must equal building the operator directly against the
    /// display grid. Compared in sparse ids, since dense assignment
    /// order differs between the two constructions.
    #[test]
    fn test_downsample_matches_direct_build_on_aggregated_grid() {
        let (grid_o, grid_i, grid_i2) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        let params = RegridParams {
            scale: false,
            eq_rad: EQ_RAD,
        };
        let rm = gcm.regrid_matrices(mask.view());

        let mut dim_a = SparseDim::new(grid_o.ncells());
        let mut dim_i = SparseDim::new(grid_i.ncells());
        let _ = rm.matrix(OperatorKind::AvI, &mut dim_a, &mut dim_i, &params);
        let iva = rm.matrix(OperatorKind::IvA, &mut dim_i, &mut dim_a, &params);
        let mut dim_i2 = SparseDim::new(grid_i2.ncells());
        let i2vi = display_overlap(&grid_i2, &grid_i, &dim_i, &mut dim_i2, EQ_RAD);
        let i2va = downsample_display(&iva, &i2vi, dim_i2.dense_extent(), false);

        // Direct build: the display grid plays the fine-grid role, with
        // the validity mask aggregated onto it (uniform per block here)
        let mut mask_i2 = Array2::from_elem((4, 4), f64::NAN);
        mask_i2[[1, 1]] = 500.0;
        mask_i2[[2, 2]] = 250.0;
        let direct_gcm = assemble_standard(
            "Ocean",
            &grid_o,
            &grid_i2,
            &HCDEFS,
            mask_i2.view(),
            &params,
            SilentProgress,
        )
        .unwrap();
        let direct_rm = direct_gcm.regrid_matrices(mask_i2.view());
        let mut direct_dim_a = SparseDim::new(grid_o.ncells());
        let mut direct_dim_i2 = SparseDim::new(grid_i2.ncells());
        let direct = direct_rm.matrix(
            OperatorKind::IvA,
            &mut direct_dim_i2,
            &mut direct_dim_a,
            &params,
        );

        let to_sparse = |op: &WeightedOperator, rows: &SparseDim, cols: &SparseDim| {
            let mut entries: Vec<(usize, usize, f64)> = op
                .m
                .iter()
                .map(|&(r, c, v)| (rows.to_sparse(r), cols.to_sparse(c), v))
                .collect();
            entries.sort_by_key(|&(r, c, _)| (r, c));
            entries
        };
        let ours = to_sparse(&i2va, &dim_i2, &dim_a);
        let theirs = to_sparse(&direct, &direct_dim_i2, &direct_dim_a);
        assert_eq!(ours.len(), theirs.len());
        for (&(r1, c1, v1), &(r2, c2, v2)) in ours.iter().zip(&theirs) {
            assert_eq!((r1, c1), (r2, c2));
            assert_relative_eq!(v1, v2, max_relative = 1e-12);
        }
    }

    /// Mismatched reconciliation magnifies every entry by the reciprocal
    /// fractional continent cover.
    #[test]
    fn test_mismatched_section_rescales_total_area() {
        let (grid_o, grid_i, _) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        // Half the cell is continent per the GCM; no cell is pure ocean
        let focean_p = Array2::from_elem((4, 4), 0.5);
        let focean_m = Array2::zeros((4, 4));
        let mm = MismatchedRegridder::new(gcm, focean_p, focean_m).unwrap();
        let rm = mm.regrid_matrices(mask.view()).unwrap();

        let mut dim_a = SparseDim::new(grid_o.ncells());
        let mut dim_i = SparseDim::new(grid_i.ncells());
        let avi = rm.matrix(
            OperatorKind::AvI,
            &mut dim_a,
            &mut dim_i,
            &RegridParams {
                scale: false,
                eq_rad: EQ_RAD,
            },
        );
        let expected = 2.0 * total_ice_area(&grid_i, &mask);
        assert_relative_eq!(entry_sum(&avi), expected, max_relative = 1e-12);
    }
}

mod matrix_properties {
    use super::*;

    /// Scaled rows are convex combinations: every row sums to one, for
    /// the directly-built operators and the downsampled pair alike.
    #[test]
    fn test_scaled_rows_sum_to_one() {
        let (grid_o, grid_i, _) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, true);
        let section = generate_section(&gcm, &mask, true);

        for (name, op) in &section.ops {
            assert!(!op.conservative, "{name} should be scaled");
            for entries in op.rows() {
                if entries.is_empty() {
                    continue;
                }
                let sum: f64 = entries.iter().map(|&(_, v)| v).sum();
                assert_relative_eq!(sum, 1.0, max_relative = 1e-12);
            }
        }
    }

    /// The scale policy changes values, never structure: both variants
    /// share the sparsity pattern and the unscaled weight vectors.
    #[test]
    fn test_scale_policy_preserves_sparsity_and_weights() {
        let (grid_o, grid_i, _) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        let raw = generate_section(&gcm, &mask, false);
        let scaled = generate_section(&gcm, &mask, true);

        for ((name_r, op_r), (name_s, op_s)) in raw.ops.iter().zip(&scaled.ops) {
            assert_eq!(name_r, name_s);
            let pattern_r: Vec<(usize, usize)> = op_r.m.iter().map(|&(r, c, _)| (r, c)).collect();
            let pattern_s: Vec<(usize, usize)> = op_s.m.iter().map(|&(r, c, _)| (r, c)).collect();
            assert_eq!(pattern_r, pattern_s, "{name_r} sparsity changed");
            for (&wr, &ws) in op_r.wm.iter().zip(&op_s.wm) {
                assert_relative_eq!(wr, ws, max_relative = 1e-12);
            }
            for (&wr, &ws) in op_r.mw.iter().zip(&op_s.mw) {
                assert_relative_eq!(wr, ws, max_relative = 1e-12);
            }
        }
    }

    /// The 250 m block splits its weight over E cells of classes 0 and 1;
    /// the 500 m block lands entirely on class 1.
    #[test]
    fn test_elevation_split_reaches_expected_e_cells() {
        let (grid_o, grid_i, _) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, false);
        let section = generate_section(&gcm, &mask, false);

        let classes: HashSet<usize> = section
            .dim_e
            .sparse_ids()
            .iter()
            .map(|&e| gcm.indexing.from_e(e).1)
            .collect();
        assert_eq!(classes, HashSet::from([0, 1]));
        // Ocean cell (1,1): class 1 only; ocean cell (2,2): classes 0 and 1
        assert_eq!(section.dim_e.dense_extent(), 3);
        assert_eq!(section.dim_a.dense_extent(), 2);
        assert_eq!(section.dim_i.dense_extent(), 8);
        assert_eq!(section.dim_i2.dense_extent(), 2);
    }
}

mod artifacts {
    use super::*;

    /// A finalized section artifact reloads block-for-block: metadata,
    /// the seven operators in generation order, the four dimensions.
    #[test]
    fn test_section_artifact_round_trip() {
        let (grid_o, grid_i, grid_i2) = grids();
        let mask = global_mask(&grid_o, &grid_i);
        let gcm = ocean_regridder(&mask, true);
        let section = generate_section(&gcm, &mask, true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global_ec-standard-00");
        let chunk = ChunkSpec {
            id: 0,
            start: (0, 0),
            end: (4, 0),
        };

        let mut writer = ChunkWriter::create(path.clone()).unwrap();
        writer
            .write_block(&ArtifactBlock::Metadata {
                runtype: "standard".to_string(),
                chunk,
                grid_a: grid_o.clone(),
                grid_i: grid_i.clone(),
                grid_i2: grid_i2.clone(),
                hcdefs: HCDEFS.to_vec(),
                indexing: gcm.indexing.clone(),
                scale: true,
            })
            .unwrap();
        for (name, op) in &section.ops {
            writer.write_operator(name, ["dst", "src"], op).unwrap();
        }
        writer
            .write_dim("dimA", &[4, 4], "GCM ('Atmosphere') Grid", &section.dim_a)
            .unwrap();
        writer
            .write_dim("dimE", &[3, 4, 4], "Elevation Grid", &section.dim_e)
            .unwrap();
        writer
            .write_dim("dimI", &[8, 8], "Fine-scale ('Ice') Grid", &section.dim_i)
            .unwrap();
        writer
            .write_dim(
                "dimI2",
                &[4, 4],
                "Reduction of fine-scale grid, for plotting",
                &section.dim_i2,
            )
            .unwrap();
        writer.finalize().unwrap();

        let blocks = read_chunk_artifact(&path).unwrap();
        assert_eq!(blocks.len(), 12);
        match &blocks[0] {
            ArtifactBlock::Metadata { runtype, chunk: c, .. } => {
                assert_eq!(runtype, "standard");
                assert_eq!(*c, chunk);
            }
            other => panic!("expected metadata first, got {other:?}"),
        }
        let names: Vec<&str> = blocks[1..8]
            .iter()
            .map(|b| match b {
                ArtifactBlock::Operator { name, .. } => name.as_str(),
                other => panic!("expected operator block, got {other:?}"),
            })
            .collect();
        assert_eq!(names, ["AvI", "EvI", "IvE", "I2vE", "IvA", "I2vA", "AvE"]);
        match &blocks[10] {
            ArtifactBlock::Dim { name, dim, .. } => {
                assert_eq!(name, "dimI");
                assert_eq!(dim.dense_extent(), section.dim_i.dense_extent());
                // Index rebuilt on load
                assert_eq!(dim.to_dense(dim.to_sparse(0)), Some(0));
            }
            other => panic!("expected dim block, got {other:?}"),
        }
    }
}

mod chunking {
    use super::*;

    /// Per-chunk validity masks partition the global mask: each iced fine
    /// cell appears in exactly one chunk, with its elevation.
    #[test]
    fn test_chunk_masks_partition_the_global_mask() {
        let (grid_o, grid_i, _) = grids();
        let (fgice_i, elev_i) = ice_scene();
        let fgice_o = fgice_to_ocean(&grid_o, &grid_i, fgice_i.view(), EQ_RAD).unwrap();
        // Threshold equals one block's ice count, so each block closes a
        // chunk on its own
        let params = ChunkParams { threshold: 4 };
        let chunks =
            plan_chunks(&grid_o, &grid_i, fgice_o.view(), fgice_i.view(), &params).unwrap();
        assert_eq!(chunks.len(), 3);

        let global = global_mask(&grid_o, &grid_i);
        let mut seen = Array2::from_elem((8, 8), 0usize);
        for chunk in &chunks {
            let mask = chunk_validity_mask(
                chunk,
                &grid_o,
                &grid_i,
                fgice_o.view(),
                fgice_i.view(),
                elev_i.view(),
            )
            .unwrap();
            for ((j, i), v) in mask.indexed_iter() {
                if !v.is_nan() {
                    seen[[j, i]] += 1;
                    assert_eq!(*v, global[[j, i]]);
                }
            }
        }
        for ((j, i), v) in global.indexed_iter() {
            assert_eq!(seen[[j, i]], if v.is_nan() { 0 } else { 1 });
        }
    }

    /// The emitted makefile is serial, re-invokes the planning command
    /// per chunk and hands every artifact to the combiner.
    #[test]
    fn test_makefile_targets_cover_all_chunks() {
        let (grid_o, grid_i, _) = grids();
        let (fgice_i, _) = ice_scene();
        let fgice_o = fgice_to_ocean(&grid_o, &grid_i, fgice_i.view(), EQ_RAD).unwrap();
        let params = ChunkParams { threshold: 4 };
        let chunks =
            plan_chunks(&grid_o, &grid_i, fgice_o.view(), fgice_i.view(), &params).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let ofname = dir.path().join("global_ec").display().to_string();
        let argv = vec!["icegrid".to_string(), "g2hx2".to_string()];
        let mk_path = write_chunk_makefile(&ofname, &argv, &chunks).unwrap();
        let text = std::fs::read_to_string(&mk_path).unwrap();

        assert!(text.starts_with(".NOTPARALLEL:"));
        assert!(text.contains("icegrid-combine"));
        for chunk in &chunks {
            assert!(text.contains(&format!("--runchunk {}", chunk.to_arg())));
            assert!(text.contains(&format!("{ofname}-standard-{:02}", chunk.id)));
            assert!(text.contains(&format!("{ofname}-mismatched-{:02}", chunk.id)));
        }
    }
}
