//! Meteorological variables and their upstream archive codes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::CommonError;

/// A variable ingested into the destination table.
///
/// `name` becomes the destination column, `code` is the path fragment the
/// archive service uses for the variable (e.g. `T_2M/T_2M.2D.`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub code: String,
}

impl Variable {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
        }
    }

    /// Whether the name is usable as an unquoted SQL column.
    pub fn is_valid_column_name(&self) -> bool {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(c) if c.is_ascii_lowercase() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    }
}

/// Ordered, duplicate-free set of variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Variable>", into = "Vec<Variable>")]
pub struct VariableSet {
    variables: Vec<Variable>,
}

impl VariableSet {
    pub fn new(variables: Vec<Variable>) -> Result<Self, CommonError> {
        if variables.is_empty() {
            return Err(CommonError::EmptyVariableSet);
        }

        let mut seen = HashSet::new();
        for variable in &variables {
            if !seen.insert(variable.name.as_str()) {
                return Err(CommonError::DuplicateVariable(variable.name.clone()));
            }
            if !variable.is_valid_column_name() {
                return Err(CommonError::UnknownVariable(variable.name.clone()));
            }
        }

        Ok(Self { variables })
    }

    /// Hourly 2D fields of the COSMO-REA6 reanalysis.
    pub fn cosmo_rea6() -> Self {
        let variables = [
            ("temp_air", "T_2M/T_2M.2D."),
            ("ghi", "ASOB_S/ASOB_S.2D."),
            ("dni", "ASWDIFD_S/ASWDIFD_S.2D."),
            ("dhi", "ASWDIR_S/ASWDIR_S.2D."),
            ("wind_meridional", "V_10M/V_10M.2D."),
            ("wind_zonal", "U_10M/U_10M.2D."),
            ("rain_con", "RAIN_CON/RAIN_CON.2D."),
            ("rain_gsp", "RAIN_GSP/RAIN_GSP.2D."),
            ("cloud_cover", "CLCT/CLCT.2D."),
        ]
        .into_iter()
        .map(|(name, code)| Variable::new(name, code))
        .collect();

        Self { variables }
    }

    /// Restrict the set to the named variables, keeping the set's order.
    pub fn select(&self, names: &[String]) -> Result<Self, CommonError> {
        for name in names {
            if self.get(name).is_none() {
                return Err(CommonError::UnknownVariable(name.clone()));
            }
        }

        let selected = self
            .variables
            .iter()
            .filter(|v| names.iter().any(|n| n == &v.name))
            .cloned()
            .collect();

        Self::new(selected)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl TryFrom<Vec<Variable>> for VariableSet {
    type Error = CommonError;

    fn try_from(variables: Vec<Variable>) -> Result<Self, Self::Error> {
        Self::new(variables)
    }
}

impl From<VariableSet> for Vec<Variable> {
    fn from(set: VariableSet) -> Self {
        set.variables
    }
}
