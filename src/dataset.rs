//! In-memory gridded dataset: named dimensions, `f64` data variables, coordinate
//! arrays and an optional coordinate reference system.
//!
//! Operations mutate the dataset in place. Each one validates before it
//! mutates; `rename_dims` applies its pairs in order and stops at the first
//! failing pair.

use ndarray::{ArrayD, Axis};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DatasetError {
    #[error("unknown dimension [{0}]")]
    UnknownDimension(String),

    #[error("unknown variable [{0}]")]
    UnknownVariable(String),

    #[error("dimension [{dim}] of variable [{var}] has size {len}, expected 1")]
    NotSingleton { var: String, dim: String, len: usize },

    #[error("cannot rename [{from}] to [{to}]: [{to}] already exists")]
    DimensionConflict { from: String, to: String },

    #[error("dimension [{dim}] has size {expected}, got {found}")]
    ShapeMismatch {
        dim: String,
        expected: usize,
        found: usize,
    },

    #[error("{found} dimension name(s) given for an array with {expected} axes")]
    DimensionCount { expected: usize, found: usize },

    #[error("dimension [{0}] listed twice")]
    DuplicateDimension(String),

    #[error("no coordinate array for dimension [{0}]")]
    MissingCoordinate(String),

    #[error("coordinate [{0}] is not numeric")]
    NotNumeric(String),

    #[error("epoch value {0} is not a representable time")]
    InvalidEpoch(f64),

    #[error("cannot parse [{0}] as an ISO-8601 timestamp")]
    InvalidTimestamp(String),

    #[error("invalid CRS identifier [{0}] (expected AUTHORITY:CODE, e.g. EPSG:32612)")]
    InvalidCrs(String),
}

/// Coordinate reference system identifier in `AUTHORITY:CODE` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crs(String);

impl Crs {
    pub fn epsg(code: u32) -> Self {
        Crs(format!("EPSG:{code}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric code when the authority is EPSG.
    pub fn epsg_code(&self) -> Option<u32> {
        self.0
            .split_once(':')
            .filter(|(auth, _)| *auth == "EPSG")
            .and_then(|(_, code)| code.parse().ok())
    }
}

impl FromStr for Crs {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DatasetError::InvalidCrs(s.to_string());
        let (auth, code) = s.trim().split_once(':').ok_or_else(invalid)?;
        let auth = auth.trim().to_ascii_uppercase();
        let code = code.trim();
        if auth.is_empty()
            || !auth.chars().all(|c| c.is_ascii_alphanumeric())
            || code.is_empty()
            || !code.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(invalid());
        }
        Ok(Crs(format!("{auth}:{code}")))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordValues {
    Numeric(Vec<f64>),
    /// ISO-8601 timestamps or other labels.
    Text(Vec<String>),
}

impl CoordValues {
    pub fn len(&self) -> usize {
        match self {
            CoordValues::Numeric(v) => v.len(),
            CoordValues::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    dims: Vec<String>,
    data: ArrayD<f64>,
    attrs: BTreeMap<String, String>,
}

impl Variable {
    pub fn new<S: Into<String>>(dims: Vec<S>, data: ArrayD<f64>) -> DatasetResult<Self> {
        let dims: Vec<String> = dims.into_iter().map(Into::into).collect();
        if dims.len() != data.ndim() {
            return Err(DatasetError::DimensionCount {
                expected: data.ndim(),
                found: dims.len(),
            });
        }
        for (i, d) in dims.iter().enumerate() {
            if dims[..i].contains(d) {
                return Err(DatasetError::DuplicateDimension(d.clone()));
            }
        }
        Ok(Self {
            dims,
            data,
            attrs: BTreeMap::new(),
        })
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Dimension {
    name: String,
    len: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    dims: Vec<Dimension>,
    variables: BTreeMap<String, Variable>,
    coords: BTreeMap<String, CoordValues>,
    attrs: BTreeMap<String, String>,
    crs: Option<Crs>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a dimension. Re-declaring with the same size is allowed.
    pub fn add_dimension(&mut self, name: impl Into<String>, len: usize) -> DatasetResult<()> {
        let name = name.into();
        match self.dim_len(&name) {
            Some(existing) if existing != len => Err(DatasetError::ShapeMismatch {
                dim: name,
                expected: existing,
                found: len,
            }),
            Some(_) => Ok(()),
            None => {
                self.dims.push(Dimension { name, len });
                Ok(())
            }
        }
    }

    /// Adds or replaces a data variable; new dimensions are registered, known ones must agree in size.
    pub fn add_variable(&mut self, name: impl Into<String>, var: Variable) -> DatasetResult<()> {
        for (dim, &len) in var.dims.iter().zip(var.data.shape()) {
            if let Some(expected) = self.dim_len(dim) {
                if expected != len {
                    return Err(DatasetError::ShapeMismatch {
                        dim: dim.clone(),
                        expected,
                        found: len,
                    });
                }
            }
        }
        for (dim, &len) in var.dims.iter().zip(var.data.shape()) {
            self.add_dimension(dim.clone(), len)?;
        }
        self.variables.insert(name.into(), var);
        Ok(())
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(key.into(), value.into());
    }

    pub fn dim_len(&self, name: &str) -> Option<usize> {
        self.dims.iter().find(|d| d.name == name).map(|d| d.len)
    }

    pub fn has_dim(&self, name: &str) -> bool {
        self.dim_len(name).is_some()
    }

    /// Dimension names and sizes in dataset order.
    pub fn dims(&self) -> impl Iterator<Item = (&str, usize)> {
        self.dims.iter().map(|d| (d.name.as_str(), d.len))
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> impl Iterator<Item = (&str, &Variable)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn coord(&self, dim: &str) -> Option<&CoordValues> {
        self.coords.get(dim)
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Drops the singleton dimension `dim` from variable `var`.
    ///
    /// A variable that does not have `dim` is left alone. Once no variable uses
    /// `dim` it is removed from the dataset together with its coordinate.
    pub fn squeeze(&mut self, var: &str, dim: &str) -> DatasetResult<()> {
        let v = self
            .variables
            .get_mut(var)
            .ok_or_else(|| DatasetError::UnknownVariable(var.to_string()))?;
        let Some(axis) = v.axis_of(dim) else {
            return Ok(());
        };
        let len = v.data.shape()[axis];
        if len != 1 {
            return Err(DatasetError::NotSingleton {
                var: var.to_string(),
                dim: dim.to_string(),
                len,
            });
        }

        v.data = v.data.index_axis(Axis(axis), 0).to_owned();
        v.dims.remove(axis);
        self.drop_unused_dim(dim);
        Ok(())
    }

    fn drop_unused_dim(&mut self, dim: &str) {
        let used = self
            .variables
            .values()
            .any(|v| v.dims.iter().any(|d| d == dim));
        if !used {
            self.dims.retain(|d| d.name != dim);
            self.coords.remove(dim);
        }
    }

    /// Renames dimensions `from → to`, in order, everywhere they appear.
    ///
    /// A pair whose source is missing but whose target already exists is a
    /// no-op, so applying the same renames twice succeeds.
    pub fn rename_dims<S: AsRef<str>>(&mut self, renames: &[(S, S)]) -> DatasetResult<()> {
        for (from, to) in renames {
            self.rename_dim(from.as_ref(), to.as_ref())?;
        }
        Ok(())
    }

    fn rename_dim(&mut self, from: &str, to: &str) -> DatasetResult<()> {
        if from == to {
            return Ok(());
        }
        match (self.has_dim(from), self.has_dim(to)) {
            (false, true) => return Ok(()),
            (false, false) => return Err(DatasetError::UnknownDimension(from.to_string())),
            (true, true) => {
                return Err(DatasetError::DimensionConflict {
                    from: from.to_string(),
                    to: to.to_string(),
                });
            }
            (true, false) => {}
        }

        for d in self.dims.iter_mut().filter(|d| d.name == from) {
            d.name = to.to_string();
        }
        for v in self.variables.values_mut() {
            for d in v.dims.iter_mut().filter(|d| d.as_str() == from) {
                *d = to.to_string();
            }
        }
        if let Some(values) = self.coords.remove(from) {
            self.coords.insert(to.to_string(), values);
        }
        log::debug!("renamed dimension {} -> {}", from, to);
        Ok(())
    }

    /// Assigns the coordinate array of `dim`; its length must match the dimension size.
    pub fn assign_coords(&mut self, dim: &str, values: CoordValues) -> DatasetResult<()> {
        let expected = self
            .dim_len(dim)
            .ok_or_else(|| DatasetError::UnknownDimension(dim.to_string()))?;
        if values.len() != expected {
            return Err(DatasetError::ShapeMismatch {
                dim: dim.to_string(),
                expected,
                found: values.len(),
            });
        }
        self.coords.insert(dim.to_string(), values);
        Ok(())
    }

    /// Reorders the axes of every variable.
    ///
    /// Dimensions named in `order` come first, in that order; the remaining
    /// dimensions of each variable keep their relative order after them.
    pub fn transpose(&mut self, order: &[&str]) -> DatasetResult<()> {
        for (i, name) in order.iter().enumerate() {
            if !self.has_dim(name) {
                return Err(DatasetError::UnknownDimension(name.to_string()));
            }
            if order[..i].contains(name) {
                return Err(DatasetError::DuplicateDimension(name.to_string()));
            }
        }

        for v in self.variables.values_mut() {
            let perm = permutation(&v.dims, order);
            if perm.iter().enumerate().all(|(i, &p)| i == p) {
                continue;
            }
            let data = v
                .data
                .view()
                .permuted_axes(perm.clone())
                .as_standard_layout()
                .into_owned();
            v.dims = perm.iter().map(|&p| v.dims[p].clone()).collect();
            v.data = data;
        }

        let mut dims = Vec::with_capacity(self.dims.len());
        for name in order {
            if let Some(pos) = self.dims.iter().position(|d| d.name == *name) {
                dims.push(self.dims.remove(pos));
            }
        }
        dims.append(&mut self.dims);
        self.dims = dims;
        Ok(())
    }

    pub fn write_crs(&mut self, crs: Crs) {
        self.crs = Some(crs);
    }
}

fn permutation(dims: &[String], order: &[&str]) -> Vec<usize> {
    let mut perm: Vec<usize> = order
        .iter()
        .filter_map(|name| dims.iter().position(|d| d == name))
        .collect();
    for i in 0..dims.len() {
        if !perm.contains(&i) {
            perm.push(i);
        }
    }
    perm
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Dataset")?;
        let dims: Vec<String> = self
            .dims
            .iter()
            .map(|d| format!("{}: {}", d.name, d.len))
            .collect();
        writeln!(f, "Dimensions: ({})", dims.join(", "))?;

        writeln!(f, "Coordinates:")?;
        for (name, values) in &self.coords {
            let kind = match values {
                CoordValues::Numeric(_) => "float64",
                CoordValues::Text(_) => "str",
            };
            let first = match values {
                CoordValues::Numeric(v) => v.first().map(|x| x.to_string()),
                CoordValues::Text(v) => v.first().cloned(),
            };
            writeln!(
                f,
                "  {:<12} ({}) {} {}",
                name,
                name,
                kind,
                first.unwrap_or_default()
            )?;
        }

        writeln!(f, "Data variables:")?;
        for (name, v) in &self.variables {
            writeln!(f, "  {:<12} ({}) float64", name, v.dims.join(", "))?;
        }

        match &self.crs {
            Some(crs) => write!(f, "CRS: {}", crs),
            None => write!(f, "CRS: (none)"),
        }
    }
}
