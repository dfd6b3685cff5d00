//! Merge projects: a persisted set of input files plus the mapping
//! configuration used to merge them, driven through a small state machine.
//!
//! ```text
//! draft -> analyzing -> ready -> merging -> completed
//!                         ^         |
//!                         +- failed <+
//! ```
//!
//! Adding a file always sends the project back to `draft`. A merge may only
//! start from `ready` or `failed`; any other state is rejected outright.

use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    columns::MappingSuggestions,
    error::{Error, Result},
    merge::{FileAnalysis, FileStatus, MergeAnalysis, MergeOptions, MergeResult, MergeService, OutputTarget},
    normalize::{self, DEFAULT_DATE_OUTPUT_FORMAT},
    template::MappingTemplate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[default]
    Draft,
    Analyzing,
    Ready,
    Merging,
    Completed,
    Failed,
}

impl ProjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Analyzing => "analyzing",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Merging => "merging",
            ProjectStatus::Completed => "completed",
            ProjectStatus::Failed => "failed",
        }
    }

    pub fn can_add_files(self) -> bool {
        matches!(
            self,
            ProjectStatus::Draft | ProjectStatus::Ready | ProjectStatus::Failed
        )
    }

    pub fn can_analyze(self) -> bool {
        !matches!(self, ProjectStatus::Analyzing | ProjectStatus::Merging)
    }

    pub fn can_execute(self) -> bool {
        matches!(self, ProjectStatus::Ready | ProjectStatus::Failed)
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<FileAnalysis>,
    #[serde(default)]
    pub processed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProjectFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            analysis: None,
            processed: false,
            error_message: None,
        }
    }

    pub fn file_name(&self) -> String {
        crate::merge::file_name(&self.path)
    }
}

/// Analysis output retained on the project once per-file results have been
/// copied onto its files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAnalysis {
    pub suggested_mappings: MappingSuggestions,
    pub all_headers: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeProject {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default)]
    pub files: Vec<ProjectFile>,
    /// Raw header → canonical name.
    #[serde(default)]
    pub column_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub date_columns: Vec<String>,
    #[serde(default)]
    pub number_columns: Vec<String>,
    #[serde(default = "default_date_output_format")]
    pub date_output_format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_result: Option<ProjectAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_log: Option<MergeResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_file_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_date_output_format() -> String {
    DEFAULT_DATE_OUTPUT_FORMAT.to_string()
}

/// Fields of a mapping update; `None` leaves the current value alone.
#[derive(Debug, Clone, Default)]
pub struct MappingUpdate {
    pub column_mapping: Option<BTreeMap<String, String>>,
    pub date_columns: Option<Vec<String>>,
    pub number_columns: Option<Vec<String>>,
    pub date_output_format: Option<String>,
}

impl MergeProject {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            status: ProjectStatus::Draft,
            files: Vec::new(),
            column_mapping: BTreeMap::new(),
            date_columns: Vec::new(),
            number_columns: Vec::new(),
            date_output_format: default_date_output_format(),
            analysis_result: None,
            merge_log: None,
            merged_file_path: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let project = serde_json::from_str(&contents)?;
        Ok(project)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(&mut self, status: ProjectStatus) {
        if self.status != status {
            info!("Project '{}' {} -> {}", self.name, self.status, status);
        }
        self.status = status;
        self.touch();
    }

    pub fn add_file(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if !self.status.can_add_files() {
            return Err(Error::InvalidState {
                action: "add files",
                status: self.status,
            });
        }
        let path = path.into();
        if !self.files.iter().any(|f| f.path == path) {
            self.files.push(ProjectFile::new(path));
        }
        self.transition(ProjectStatus::Draft);
        Ok(())
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        let before = self.files.len();
        self.files.retain(|f| f.path != path);
        let removed = self.files.len() != before;
        if removed {
            self.touch();
        }
        removed
    }

    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    /// Moves the project into `analyzing`; rejected while another run is active.
    pub fn begin_analysis(&mut self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::NoInputFiles);
        }
        if !self.status.can_analyze() {
            return Err(Error::InvalidState {
                action: "analyze",
                status: self.status,
            });
        }
        self.transition(ProjectStatus::Analyzing);
        Ok(())
    }

    pub fn record_analysis(&mut self, analysis: MergeAnalysis) -> &ProjectAnalysis {
        for result in analysis.files {
            let Some(file) = self.files.iter_mut().find(|f| f.path == result.file_path) else {
                continue;
            };
            file.error_message = result.error.clone();
            file.analysis = Some(result);
        }
        self.transition(ProjectStatus::Ready);
        self.analysis_result.insert(ProjectAnalysis {
            suggested_mappings: analysis.suggested_mappings,
            all_headers: analysis.all_headers,
            analyzed_at: Utc::now(),
        })
    }

    pub fn analyze(&mut self, service: &MergeService) -> Result<&ProjectAnalysis> {
        self.begin_analysis()?;
        let analysis = service.analyze_files(&self.file_paths());
        Ok(self.record_analysis(analysis))
    }

    pub fn update_mapping(&mut self, update: MappingUpdate) -> Result<()> {
        if matches!(self.status, ProjectStatus::Analyzing | ProjectStatus::Merging) {
            return Err(Error::InvalidState {
                action: "update the mapping",
                status: self.status,
            });
        }
        if let Some(format) = &update.date_output_format {
            normalize::validate_date_format(format)?;
        }
        if let Some(mapping) = update.column_mapping {
            self.column_mapping = mapping;
        }
        if let Some(columns) = update.date_columns {
            self.date_columns = columns;
        }
        if let Some(columns) = update.number_columns {
            self.number_columns = columns;
        }
        if let Some(format) = update.date_output_format {
            self.date_output_format = format;
        }
        self.transition(ProjectStatus::Ready);
        Ok(())
    }

    pub fn apply_template(&mut self, template: &MappingTemplate) -> Result<()> {
        self.update_mapping(MappingUpdate {
            column_mapping: Some(template.column_mapping.clone()),
            date_columns: Some(template.date_columns.clone()),
            number_columns: Some(template.number_columns.clone()),
            date_output_format: Some(template.date_output_format.clone()),
        })
    }

    pub fn to_template(&self, name: impl Into<String>, description: impl Into<String>) -> MappingTemplate {
        MappingTemplate {
            name: name.into(),
            description: description.into(),
            column_mapping: self.column_mapping.clone(),
            date_columns: self.date_columns.clone(),
            number_columns: self.number_columns.clone(),
            date_output_format: self.date_output_format.clone(),
            ..MappingTemplate::default()
        }
    }

    pub fn begin_merge(&mut self) -> Result<()> {
        if !self.status.can_execute() {
            return Err(Error::InvalidState {
                action: "execute a merge",
                status: self.status,
            });
        }
        if self.files.is_empty() {
            return Err(Error::NoInputFiles);
        }
        self.error_message = None;
        self.transition(ProjectStatus::Merging);
        Ok(())
    }

    /// Merge options built from the project's configuration.
    pub fn merge_options(&self, output: OutputTarget) -> MergeOptions {
        MergeOptions {
            column_mapping: self.column_mapping.clone(),
            date_columns: self.date_columns.clone(),
            number_columns: self.number_columns.clone(),
            add_source_column: true,
            sort_by: None,
            auto_detect_types: true,
            output,
            ..MergeOptions::default()
        }
    }

    /// Registers every explicit mapping entry as an alias of its target.
    pub fn prepare_service(&self, service: &mut MergeService) {
        for (original, standard) in &self.column_mapping {
            service.mapper_mut().add_mapping(standard, [original.as_str()]);
        }
    }

    pub fn record_merge(&mut self, result: MergeResult) -> &MergeResult {
        if result.success {
            for log in &result.per_file_log {
                let Some(file) = self.files.iter_mut().find(|f| f.file_name() == log.file) else {
                    continue;
                };
                file.processed = log.status == FileStatus::Success;
                if log.error.is_some() {
                    file.error_message = log.error.clone();
                }
            }
            self.merged_file_path = result.output_location.clone();
            self.completed_at = Some(Utc::now());
            self.transition(ProjectStatus::Completed);
        } else {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "Merge failed".to_string());
            warn!("Project '{}' merge failed: {message}", self.name);
            self.error_message = Some(message);
            self.transition(ProjectStatus::Failed);
        }
        self.merge_log.insert(result)
    }

    /// Runs a merge end to end; the outcome is also stored as `merge_log`.
    pub fn execute(&mut self, service: &mut MergeService, output: OutputTarget) -> Result<&MergeResult> {
        self.begin_merge()?;
        self.prepare_service(service);
        let options = self.merge_options(output);
        let result = service.merge_files(&self.file_paths(), &options);
        Ok(self.record_merge(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project_with_file() -> MergeProject {
        let mut project = MergeProject::new("분기 병합", "");
        project.add_file("a.csv").unwrap();
        project
    }

    #[test]
    fn execute_is_rejected_from_draft() {
        let mut project = project_with_file();
        let err = project.begin_merge().unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                status: ProjectStatus::Draft,
                ..
            }
        ));
        assert_eq!(err.to_string(), "Cannot execute a merge while project is draft");
    }

    #[test]
    fn adding_a_file_resets_to_draft() {
        let mut project = project_with_file();
        project.update_mapping(MappingUpdate::default()).unwrap();
        assert_eq!(project.status, ProjectStatus::Ready);
        project.add_file("b.csv").unwrap();
        assert_eq!(project.status, ProjectStatus::Draft);
        assert_eq!(project.files.len(), 2);
    }

    #[test]
    fn active_runs_block_other_transitions() {
        let mut project = project_with_file();
        project.begin_analysis().unwrap();
        assert!(project.begin_analysis().is_err());
        assert!(project.add_file("b.csv").is_err());
        assert!(project.update_mapping(MappingUpdate::default()).is_err());
    }

    #[test]
    fn failed_merge_can_be_retried() {
        let mut project = project_with_file();
        project.update_mapping(MappingUpdate::default()).unwrap();
        project.begin_merge().unwrap();
        project.record_merge(MergeResult {
            error: Some("No data to merge".to_string()),
            ..MergeResult::default()
        });
        assert_eq!(project.status, ProjectStatus::Failed);
        assert_eq!(project.error_message.as_deref(), Some("No data to merge"));
        project.begin_merge().unwrap();
        assert_eq!(project.status, ProjectStatus::Merging);
        assert_eq!(project.error_message, None);
    }

    #[test]
    fn invalid_date_pattern_is_rejected() {
        let mut project = project_with_file();
        let update = MappingUpdate {
            date_output_format: Some("%Y-%Q".to_string()),
            ..MappingUpdate::default()
        };
        assert!(matches!(
            project.update_mapping(update),
            Err(Error::InvalidDateFormat(_))
        ));
        assert_eq!(project.status, ProjectStatus::Draft);
    }

    #[test]
    fn projects_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("project.json");
        let mut project = project_with_file();
        project
            .column_mapping
            .insert("거래 일자".to_string(), "날짜".to_string());
        project.save(&path).unwrap();
        let loaded = MergeProject::load(&path).unwrap();
        assert_eq!(loaded, project);
    }
}
