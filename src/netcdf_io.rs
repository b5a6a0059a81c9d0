//! Loading NetCDF files into a [`Dataset`]. Requires the `netcdf` feature (links libnetcdf).

use anyhow::{Context, Result};
use ndarray::{ArrayD, IxDyn};
use std::path::Path;

use crate::dataset::{CoordValues, Dataset, Variable};

/// Reads every numeric variable of the file at `path` as `f64`.
///
/// One-dimensional variables named after their own dimension (CF coordinate
/// variables) become coordinates; everything else becomes a data variable.
/// Text variables are skipped.
pub fn open_netcdf(path: &Path) -> Result<Dataset> {
    let file =
        netcdf::open(path).with_context(|| format!("failed to open NetCDF file {}", path.display()))?;

    let mut ds = Dataset::new();
    for dim in file.dimensions() {
        ds.add_dimension(dim.name(), dim.len())?;
    }

    let mut coords: Vec<(String, Vec<f64>)> = Vec::new();
    for var in file.variables() {
        let name = var.name();
        let dims: Vec<String> = var.dimensions().iter().map(|d| d.name()).collect();
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();

        let values = match var.get_values::<f64, _>(..) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("skipping variable {} in {}: {}", name, path.display(), e);
                continue;
            }
        };

        if dims.len() == 1 && dims[0] == name {
            coords.push((name, values));
            continue;
        }

        let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .with_context(|| format!("variable {} does not match its declared shape", name))?;
        let mut variable = Variable::new(dims, data)?;
        for attr in var.attributes() {
            if let Ok(netcdf::AttributeValue::Str(s)) = attr.value() {
                variable = variable.with_attr(attr.name(), s);
            }
        }
        ds.add_variable(name, variable)?;
    }

    for (name, values) in coords {
        ds.assign_coords(&name, CoordValues::Numeric(values))?;
    }

    for attr in file.attributes() {
        if let Ok(netcdf::AttributeValue::Str(s)) = attr.value() {
            ds.set_attr(attr.name(), s);
        }
    }

    log::info!("opened {}:\n{}", path.display(), ds);
    Ok(ds)
}
