//! Project files (`.rgen`): the JSON document the schedule editor saves.
//!
//! Loading validates the top-level structure and migrates files written
//! before metadata existed. Editor-only sections (ad types, tabs) are kept
//! as opaque JSON so a load/save cycle does not lose them.

use crate::error::ProjectError;
use crate::model::{ArrangementMap, ExportSettings, RecordMap, Schedule, Source};
use crate::preflight::CheckReport;
use chrono::{DateTime, Utc};
use lofty::file::AudioFile;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

pub const PROJECT_VERSION: &str = "1.0.0";
pub const PROJECT_EXTENSION: &str = "rgen";
const LEGACY_VERSION: &str = "0.9.0";
const MIGRATED_NAME: &str = "Migrated Project";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectMetadata {
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub app_version: String,
    pub total_records: usize,
    pub total_sources: usize,
    pub project_name: String,
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        let now = Utc::now();
        ProjectMetadata {
            version: PROJECT_VERSION.to_string(),
            created_at: now,
            modified_at: now,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            total_records: 0,
            total_sources: 0,
            project_name: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFile {
    pub metadata: ProjectMetadata,
    pub sources: Vec<Source>,
    pub arrangements: ArrangementMap,
    pub time_of_records: RecordMap,
    #[serde(default)]
    pub ad_types: Vec<Value>,
    #[serde(default)]
    pub tabs: Vec<Value>,
    #[serde(default)]
    pub tabs_sync: BTreeMap<String, String>,
    #[serde(default)]
    pub export_settings: ExportSettings,
}

/// Shape accepted on load: the three schedule sections are required, the rest
/// is filled in by migration.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProject {
    metadata: Option<ProjectMetadata>,
    sources: Option<Vec<Source>>,
    arrangements: Option<ArrangementMap>,
    time_of_records: Option<RecordMap>,
    #[serde(default)]
    ad_types: Option<Vec<Value>>,
    #[serde(default)]
    tabs: Option<Vec<Value>>,
    #[serde(default)]
    tabs_sync: Option<BTreeMap<String, String>>,
    #[serde(default)]
    export_settings: Option<ExportSettings>,
}

fn missing(field: &str) -> ProjectError {
    ProjectError::InvalidStructure(format!("missing '{}'", field))
}

impl ProjectFile {
    pub fn schedule(&self) -> Schedule<'_> {
        Schedule::new(&self.arrangements, &self.time_of_records)
    }

    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    fn refresh_metadata(&mut self, project_name: &str) {
        let now = Utc::now();
        self.metadata.version = PROJECT_VERSION.to_string();
        self.metadata.modified_at = now;
        self.metadata.app_version = env!("CARGO_PKG_VERSION").to_string();
        self.metadata.total_records = self.arrangements.len();
        self.metadata.total_sources = self.sources.len();
        self.metadata.project_name = project_name.to_string();
    }
}

/// Parse and migrate a project document.
pub fn parse_project(json: &str) -> Result<ProjectFile, ProjectError> {
    let raw: RawProject = serde_json::from_str(json)?;

    let sources = raw.sources.ok_or_else(|| missing("sources"))?;
    let arrangements = raw.arrangements.ok_or_else(|| missing("arrangements"))?;
    let time_of_records = raw.time_of_records.ok_or_else(|| missing("timeOfRecords"))?;

    let metadata = raw.metadata.unwrap_or_else(|| {
        info!("Project has no metadata, migrating from {}", LEGACY_VERSION);
        ProjectMetadata {
            version: LEGACY_VERSION.to_string(),
            total_records: arrangements.len(),
            total_sources: sources.len(),
            project_name: MIGRATED_NAME.to_string(),
            ..ProjectMetadata::default()
        }
    });

    let mut project = ProjectFile {
        metadata,
        sources,
        arrangements,
        time_of_records,
        ad_types: raw.ad_types.unwrap_or_default(),
        tabs: raw.tabs.unwrap_or_default(),
        tabs_sync: raw.tabs_sync.unwrap_or_default(),
        export_settings: raw.export_settings.unwrap_or_default(),
    };
    project.metadata.version = PROJECT_VERSION.to_string();
    project.metadata.modified_at = Utc::now();
    Ok(project)
}

pub fn load_project(path: &Path) -> Result<ProjectFile, ProjectError> {
    let data = fs::read_to_string(path).map_err(|source| ProjectError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let project = parse_project(&data)?;
    info!(
        "Loaded project '{}' ({} sources, {} records)",
        project.metadata.project_name,
        project.sources.len(),
        project.time_of_records.len()
    );
    Ok(project)
}

/// Write the project as pretty JSON with refreshed metadata.
pub fn save_project(project: &mut ProjectFile, path: &Path, project_name: &str) -> Result<(), ProjectError> {
    project.refresh_metadata(project_name);
    let json = serde_json::to_string_pretty(project)?;
    fs::write(path, json).map_err(|source| ProjectError::Io {
        path: path.display().to_string(),
        source,
    })?;
    info!("Saved project '{}' to {}", project_name, path.display());
    Ok(())
}

/// Structural sanity checks on a loaded project.
pub fn check_project(project: &ProjectFile) -> CheckReport {
    let mut report = CheckReport::default();

    if project.sources.is_empty() {
        report.errors.push("Add at least one audio source".to_string());
    }
    for (index, source) in project.sources.iter().enumerate() {
        if source.id.is_empty() || source.title.is_empty() {
            report
                .errors
                .push(format!("Source {}: missing id or title", index + 1));
        }
        if source.type_id.is_none() {
            report
                .warnings
                .push(format!("Source \"{}\": no type assigned", source.title));
        }
    }

    if !project.schedule().has_arrangements() {
        report
            .errors
            .push("Add at least one announcement to a record".to_string());
    }
    for (name, list) in &project.arrangements {
        for (index, arrangement) in list.iter().enumerate() {
            if arrangement.id.is_empty() {
                report.errors.push(format!(
                    "Record \"{}\", announcement {}: missing id",
                    name,
                    index + 1
                ));
            }
            if arrangement.type_id.is_none() {
                report.warnings.push(format!(
                    "Record \"{}\", announcement {}: no source type assigned",
                    name,
                    index + 1
                ));
            }
        }
    }

    if project.time_of_records.is_empty() {
        report
            .errors
            .push("Create at least one time record".to_string());
    }

    let source_types: BTreeSet<&str> = project
        .sources
        .iter()
        .filter_map(|s| s.type_id.as_deref())
        .collect();
    let unmatched = project
        .arrangements
        .values()
        .flatten()
        .filter_map(|a| a.type_id.as_deref())
        .any(|t| !source_types.contains(t));
    if unmatched {
        report
            .errors
            .push("Some announcements have no matching audio source".to_string());
    }

    report
}

/// Read every source's audio file into memory, keyed by source id.
///
/// Relative paths are resolved against `base_dir`. Sources without a path or
/// with an unreadable file are left out; the export reports them later.
pub fn load_source_files(project: &ProjectFile, base_dir: &Path) -> HashMap<String, Vec<u8>> {
    let mut files = HashMap::new();
    for source in &project.sources {
        let Some(path) = &source.file_path else {
            warn!("Source '{}' has no file path", source.title);
            continue;
        };
        let full = if path.is_absolute() {
            path.clone()
        } else {
            base_dir.join(path)
        };
        match fs::read(&full) {
            Ok(bytes) => {
                files.insert(source.id.clone(), bytes);
            }
            Err(e) => warn!("Cannot read '{}' for source '{}': {}", full.display(), source.title, e),
        }
    }
    files
}

/// Container duration of an audio file in seconds.
pub fn probe_duration(path: &Path) -> Result<f64, String> {
    let tagged_file = lofty::read_from_path(path)
        .map_err(|e| format!("Failed to read '{}': {}", path.display(), e))?;
    Ok(tagged_file.properties().duration().as_secs_f64())
}
