//! Input field files and coarse-grid derivations.
//!
//! Inputs are maps of named 2-D fields serialized with serde (the
//! encoding container is deliberately simple; grid files produced by the
//! topography toolchain are converted upstream). A missing or
//! wrongly-shaped field is a data error naming the field and file.

use crate::errors::{IcegridError, IcegridResult};
use crate::grid::GridSpec;
use ndarray::{Array2, ArrayView2};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// A file of named 2-D fields.
pub type FieldFile = HashMap<String, Array2<f64>>;

pub fn read_fields(path: &Path) -> IcegridResult<FieldFile> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn write_fields(path: &Path, fields: &FieldFile) -> IcegridResult<()> {
    let file = File::create(path)?;
    serde_json::to_writer(BufWriter::new(file), fields)?;
    Ok(())
}

/// Remove `field` from a loaded file, checking its shape against `grid`.
pub fn take_field(
    fields: &mut FieldFile,
    path: &Path,
    field: &str,
    grid: &GridSpec,
) -> IcegridResult<Array2<f64>> {
    let arr = fields
        .remove(field)
        .ok_or_else(|| IcegridError::MissingField {
            field: field.to_string(),
            path: path.display().to_string(),
        })?;
    if arr.dim() != (grid.jm, grid.im) {
        return Err(IcegridError::FieldShape {
            field: field.to_string(),
            found: arr.shape().to_vec(),
            expected: vec![grid.jm, grid.im],
        });
    }
    Ok(arr)
}

/// Derive the coarse-grid ice indicator from the fine-grid ice mask by
/// area-weighted aggregation over each coarse cell's fine block.
pub fn fgice_to_ocean(
    grid_o: &GridSpec,
    grid_i: &GridSpec,
    fgice_i: ArrayView2<'_, f64>,
    eq_rad: f64,
) -> IcegridResult<Array2<f64>> {
    let (mult_j, mult_i) = grid_i.multiple_of(grid_o)?;
    let mut fgice_o = Array2::zeros((grid_o.jm, grid_o.im));
    for j in 0..grid_o.jm {
        for i in 0..grid_o.im {
            let mut ice_area = 0.0;
            let mut total_area = 0.0;
            for jj in j * mult_j..(j + 1) * mult_j {
                let area = grid_i.cell_area(jj, eq_rad);
                for ii in i * mult_i..(i + 1) * mult_i {
                    total_area += area;
                    if fgice_i[[jj, ii]] != 0.0 {
                        ice_area += area;
                    }
                }
            }
            fgice_o[[j, i]] = ice_area / total_area;
        }
    }
    Ok(fgice_o)
}
