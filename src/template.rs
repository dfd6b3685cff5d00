//! Reusable mapping templates stored as YAML.
//!
//! A template captures the configuration side of a merge (explicit column
//! overrides, typed columns, output date pattern) plus custom aliases that are
//! merged additively into a [`ColumnMapper`].

use std::{collections::BTreeMap, fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    columns::ColumnMapper,
    error::Result,
    merge::MergeOptions,
    normalize::{self, DEFAULT_DATE_OUTPUT_FORMAT},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MappingTemplate {
    pub name: String,
    pub description: String,
    pub column_mapping: BTreeMap<String, String>,
    pub date_columns: Vec<String>,
    pub number_columns: Vec<String>,
    pub date_output_format: String,
    /// Canonical name → extra aliases.
    pub custom_aliases: BTreeMap<String, Vec<String>>,
    pub visibility: Visibility,
}

impl Default for MappingTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            column_mapping: BTreeMap::new(),
            date_columns: Vec::new(),
            number_columns: Vec::new(),
            date_output_format: DEFAULT_DATE_OUTPUT_FORMAT.to_string(),
            custom_aliases: BTreeMap::new(),
            visibility: Visibility::Private,
        }
    }
}

impl MappingTemplate {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let template: MappingTemplate = serde_yaml::from_str(&contents)?;
        template.validate()?;
        Ok(template)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        normalize::validate_date_format(&self.date_output_format)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }

    pub fn apply_aliases(&self, mapper: &mut ColumnMapper) {
        for (standard, aliases) in &self.custom_aliases {
            mapper.add_mapping(standard, aliases.iter().map(String::as_str));
        }
    }

    pub fn apply_to_options(&self, options: &mut MergeOptions) {
        options.column_mapping.extend(
            self.column_mapping
                .iter()
                .map(|(raw, standard)| (raw.clone(), standard.clone())),
        );
        options.date_columns.extend(self.date_columns.iter().cloned());
        options.number_columns.extend(self.number_columns.iter().cloned());
    }
}
