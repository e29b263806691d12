//! Dataset manifest parsing and validation.
//!
//! Each entry in `datasets` is parsed on its own into a closed [`EntryKind`]
//! variant. Entries that fail to parse or validate become
//! [`ManifestItem::Invalid`] and never reach file I/O. Only structural problems
//! with the manifest as a whole are fatal.

use constants::coordinate_system::{IDENTITY_TRANSFORM, METERS_IN_KM, METERS_IN_PC};
use constants::render_settings::{
    BRANCH_LINE_WIDTH, BRANCH_OPACITY, INTERACTION_SPHERE, POINT_SCALE_EXPONENT,
    POINT_SCALE_FACTOR, TEXT_MAX_SIZE, TEXT_MIN_SIZE, TEXT_SIZE,
};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

use crate::colors::{ColorError, ColorOverride, ColorTable};
use crate::coordinates::{Centering, Projection, TransformSpec};
use crate::error::{EntryError, ManifestError};

fn default_true() -> bool {
    true
}
fn default_one() -> f64 {
    1.0
}
fn default_x() -> String {
    "x".to_string()
}
fn default_y() -> String {
    "y".to_string()
}
fn default_z() -> String {
    "z".to_string()
}
fn default_from() -> String {
    "from".to_string()
}
fn default_to() -> String {
    "to".to_string()
}
fn default_point_scale_factor() -> f64 {
    POINT_SCALE_FACTOR
}
fn default_point_scale_exponent() -> f64 {
    POINT_SCALE_EXPONENT
}
fn default_interaction_sphere() -> f64 {
    INTERACTION_SPHERE
}
fn default_label_size() -> f64 {
    TEXT_SIZE
}
fn default_label_minsize() -> f64 {
    TEXT_MIN_SIZE
}
fn default_label_maxsize() -> f64 {
    TEXT_MAX_SIZE
}
fn default_line_width() -> f64 {
    BRANCH_LINE_WIDTH
}
fn default_opacity() -> f64 {
    BRANCH_OPACITY
}

/// Accept lookup values written as JSON strings or numbers.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/// Accept flags written as JSON booleans or as 0 and 1.
fn bool_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Bool(b) => Ok(b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(de::Error::custom(format!("expected true, false, 0 or 1, found {n}"))),
        },
        other => Err(de::Error::custom(format!("expected a boolean, found {other}"))),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Points,
    Labels,
    GroupLabels,
    Branches,
    Models,
    Pdb,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Points => "points",
            EntryType::Labels => "labels",
            EntryType::GroupLabels => "group_labels",
            EntryType::Branches => "branches",
            EntryType::Models => "models",
            EntryType::Pdb => "pdb",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How entries are ordered for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrdering {
    /// Declaration order; references must point backwards.
    #[default]
    Declared,
    /// Topological order over parent and points_file references.
    Dependency,
}

/// Distance unit of a dataset's output coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Units {
    #[default]
    #[serde(rename = "Km", alias = "km")]
    Km,
    #[serde(rename = "m")]
    M,
    #[serde(rename = "pc")]
    Pc,
}

impl Units {
    pub fn as_str(&self) -> &'static str {
        match self {
            Units::Km => "Km",
            Units::M => "m",
            Units::Pc => "pc",
        }
    }

    pub fn meters(&self) -> f64 {
        match self {
            Units::Km => METERS_IN_KM,
            Units::M => 1.0,
            Units::Pc => METERS_IN_PC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParentRef {
    pub csv_file: String,
    #[serde(default)]
    pub parent_type: Option<EntryType>,
    pub parent_column: String,
    #[serde(deserialize_with = "string_or_number")]
    pub parent_point: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GuiInfo {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub hidden: bool,
}

/// Fields shared by every entry type.
#[derive(Debug, Clone, Deserialize)]
pub struct EntryCommon {
    pub csv_file: String,
    #[serde(default)]
    pub name: Option<String>,
    pub data_scale_factor: f64,
    #[serde(default)]
    pub id_column: Option<String>,
    #[serde(default = "default_x")]
    pub x_column: String,
    #[serde(default = "default_y")]
    pub y_column: String,
    #[serde(default = "default_z")]
    pub z_column: String,
    #[serde(default)]
    pub projection: Projection,
    #[serde(default)]
    pub axis_transform: Option<[[f64; 3]; 3]>,
    #[serde(default)]
    pub recenter: bool,
    #[serde(default)]
    pub center: Option<[f64; 3]>,
    #[serde(default)]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub units: Units,
    #[serde(default)]
    pub fade_targets: Vec<String>,
    #[serde(default)]
    pub gui_info: GuiInfo,
    #[serde(default = "default_true", deserialize_with = "bool_or_int")]
    pub enabled: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub skip: bool,
    #[serde(default)]
    pub color_by_columns: Vec<String>,
    #[serde(default)]
    pub colormap: Option<String>,
    #[serde(default)]
    pub color_overrides: Vec<ColorOverride>,
    #[serde(default)]
    pub shared_colormap: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PointsFields {
    #[serde(default)]
    pub default_texture: Option<String>,
    #[serde(default = "default_point_scale_factor")]
    pub point_scale_factor: f64,
    #[serde(default = "default_point_scale_exponent")]
    pub point_scale_exponent: f64,
    #[serde(default)]
    pub max_size: Option<f64>,
    #[serde(default = "default_interaction_sphere")]
    pub interaction_sphere: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelsFields {
    pub label_column: String,
    #[serde(default = "default_label_size")]
    pub label_size: f64,
    #[serde(default = "default_label_minsize")]
    pub label_minsize: f64,
    #[serde(default = "default_label_maxsize")]
    pub label_maxsize: f64,
    /// Group labels only: push each centroid out to its group's radius.
    #[serde(default = "default_true")]
    pub on_sphere: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BranchesFields {
    pub points_file: String,
    #[serde(default = "default_from")]
    pub from_column: String,
    #[serde(default = "default_to")]
    pub to_column: String,
    #[serde(default = "default_line_width")]
    pub line_width: f64,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelPlacement {
    pub column: String,
    #[serde(deserialize_with = "string_or_number")]
    pub taxon: String,
    pub model: String,
    #[serde(default = "default_one")]
    pub model_scale: f64,
    #[serde(default = "default_true", deserialize_with = "bool_or_int")]
    pub enabled: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelsFields {
    pub model_list: Vec<ModelPlacement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProteinPlacement {
    pub column: String,
    #[serde(deserialize_with = "string_or_number")]
    pub taxon: String,
    pub pdb_file: String,
    #[serde(default = "default_one")]
    pub scale: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PdbFields {
    pub protein_list: Vec<ProteinPlacement>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    Points(PointsFields),
    Labels(LabelsFields),
    GroupLabels(LabelsFields),
    Branches(BranchesFields),
    Models(ModelsFields),
    Pdb(PdbFields),
}

impl EntryKind {
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryKind::Points(_) => EntryType::Points,
            EntryKind::Labels(_) => EntryType::Labels,
            EntryKind::GroupLabels(_) => EntryType::GroupLabels,
            EntryKind::Branches(_) => EntryType::Branches,
            EntryKind::Models(_) => EntryType::Models,
            EntryKind::Pdb(_) => EntryType::Pdb,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    #[serde(flatten)]
    common: EntryCommon,
    #[serde(flatten)]
    kind: EntryKind,
}

/// Where an entry's colors come from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColormapSource {
    /// The run palette.
    Palette,
    /// A `.dat` color table replacing the run palette for this entry.
    Table(PathBuf),
    /// A previously written `.cmap` whose assignments are kept.
    Legend(PathBuf),
}

/// A validated manifest entry.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Position in the `datasets` array.
    pub position: usize,
    pub base_name: String,
    pub identifier: String,
    pub csv_path: PathBuf,
    pub common: EntryCommon,
    pub kind: EntryKind,
    pub parent_path: Option<PathBuf>,
    pub points_path: Option<PathBuf>,
    pub colormap: ColormapSource,
    /// Fade targets resolved to artifact identifiers.
    pub fade_identifiers: Vec<String>,
}

impl Entry {
    pub fn entry_type(&self) -> EntryType {
        self.kind.entry_type()
    }

    /// Disabled entries are resolved for references but emit nothing.
    pub fn is_disabled(&self) -> bool {
        !self.common.enabled || self.common.skip
    }

    pub fn transform_spec(&self) -> TransformSpec {
        let centering = match (self.common.recenter, self.common.center) {
            (_, Some(c)) => Centering::Fixed(c),
            (true, None) => Centering::Mean,
            (false, None) => Centering::None,
        };
        TransformSpec {
            x_column: self.common.x_column.clone(),
            y_column: self.common.y_column.clone(),
            z_column: self.common.z_column.clone(),
            projection: self.common.projection.clone(),
            axis: self.common.axis_transform.unwrap_or(IDENTITY_TRANSFORM),
            centering,
        }
    }

    pub fn gui_name(&self) -> String {
        self.common
            .gui_info
            .name
            .clone()
            .unwrap_or_else(|| self.identifier.clone())
    }

    pub fn gui_path(&self, dataset_name: &str) -> String {
        self.common
            .gui_info
            .path
            .clone()
            .unwrap_or_else(|| format!("/{dataset_name}"))
    }

    /// Paths this entry must see resolved before it runs.
    fn references(&self) -> Vec<(&PathBuf, Option<EntryType>)> {
        let mut refs = Vec::new();
        if let (Some(path), Some(parent)) = (&self.parent_path, &self.common.parent) {
            refs.push((path, parent.parent_type));
        }
        if let Some(path) = &self.points_path {
            refs.push((path, None));
        }
        refs
    }

    fn provides(&self, path: &Path, entry_type: Option<EntryType>) -> bool {
        self.csv_path == path && entry_type.is_none_or(|t| t == self.entry_type())
    }
}

/// An entry rejected at parse time, kept so the run summary can report it.
#[derive(Debug)]
pub struct InvalidEntry {
    pub position: usize,
    pub label: String,
    pub error: EntryError,
}

#[derive(Debug)]
pub enum ManifestItem {
    Valid(Box<Entry>),
    Invalid(InvalidEntry),
}

impl ManifestItem {
    pub fn label(&self) -> &str {
        match self {
            ManifestItem::Valid(entry) => &entry.identifier,
            ManifestItem::Invalid(invalid) => &invalid.label,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    dataset_name: Option<String>,
    #[serde(default)]
    ordering: EntryOrdering,
    #[serde(default)]
    color_table: Option<String>,
    #[serde(default)]
    palette_colors: Vec<String>,
    #[serde(default)]
    datasets: Option<Vec<Value>>,
}

#[derive(Debug)]
pub struct Manifest {
    pub path: PathBuf,
    /// Relative paths in the manifest resolve against this directory.
    pub base_dir: PathBuf,
    pub dataset_name: String,
    pub ordering: EntryOrdering,
    pub color_table: Option<PathBuf>,
    pub palette_colors: Vec<String>,
    /// Items in processing order.
    pub items: Vec<ManifestItem>,
}

impl Manifest {
    /// Read and validate a manifest file.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    /// Validate manifest text as if it had been read from `path`.
    pub fn parse(text: &str, path: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(text).map_err(|source| ManifestError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let dataset_name = raw
            .dataset_name
            .filter(|n| !n.trim().is_empty())
            .ok_or(ManifestError::MissingField("dataset_name"))?;
        let datasets = raw.datasets.ok_or(ManifestError::MissingField("datasets"))?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut items: Vec<ManifestItem> = datasets
            .into_iter()
            .enumerate()
            .map(|(position, value)| parse_entry(position, value, &base_dir))
            .collect();

        reject_duplicate_identifiers(&mut items);
        let items = match raw.ordering {
            EntryOrdering::Declared => check_backward_references(items),
            EntryOrdering::Dependency => sort_by_dependency(items)?,
        };

        let mut manifest = Self {
            path: path.to_path_buf(),
            color_table: raw.color_table.map(|p| resolve_path(&base_dir, &p)),
            base_dir,
            dataset_name,
            ordering: raw.ordering,
            palette_colors: raw.palette_colors,
            items,
        };
        manifest.resolve_fade_targets();

        debug!(
            manifest = %path.display(),
            entries = manifest.items.len(),
            valid = manifest.entries().count(),
            "Parsed manifest"
        );
        Ok(manifest)
    }

    /// Valid entries in processing order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.items.iter().filter_map(|item| match item {
            ManifestItem::Valid(entry) => Some(entry.as_ref()),
            ManifestItem::Invalid(_) => None,
        })
    }

    /// Build the run palette from `color_table` and `palette_colors`.
    pub fn palette(&self) -> Result<ColorTable, ManifestError> {
        let invalid = |e: ColorError| ManifestError::InvalidField {
            field: "color_table",
            reason: e.to_string(),
        };
        let table = match &self.color_table {
            Some(path) => ColorTable::load(path).map_err(invalid)?,
            None => ColorTable::builtin(),
        };
        if self.palette_colors.is_empty() {
            return Ok(table);
        }
        table
            .select(&self.palette_colors)
            .map_err(|e| ManifestError::InvalidField {
                field: "palette_colors",
                reason: e.to_string(),
            })
    }

    fn resolve_fade_targets(&mut self) {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for entry in self.entries() {
            by_name
                .entry(entry.identifier.clone())
                .or_default()
                .push(entry.identifier.clone());
            if entry.base_name != entry.identifier {
                by_name
                    .entry(entry.base_name.clone())
                    .or_default()
                    .push(entry.identifier.clone());
            }
        }

        for item in &mut self.items {
            let ManifestItem::Valid(entry) = item else {
                continue;
            };
            let mut resolved: Vec<String> = Vec::new();
            for target in &entry.common.fade_targets {
                match by_name.get(target) {
                    Some(ids) => {
                        for id in ids {
                            if id != &entry.identifier && !resolved.contains(id) {
                                resolved.push(id.clone());
                            }
                        }
                    }
                    None => warn!(
                        entry = %entry.identifier,
                        target = %target,
                        "Unknown fade target ignored"
                    ),
                }
            }
            entry.fade_identifiers = resolved;
        }
    }
}

/// Join `path` onto `base` unless absolute, dropping `.` components.
pub fn resolve_path(base: &Path, path: &str) -> PathBuf {
    base.join(path)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Replace anything outside `[A-Za-z0-9_]` and avoid a leading digit.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// Artifact base name: explicit `name`, else the CSV stem with `.` as `_`.
pub fn base_name(common: &EntryCommon) -> String {
    let raw = match &common.name {
        Some(name) => name.clone(),
        None => Path::new(&common.csv_file)
            .file_stem()
            .map(|s| s.to_string_lossy().replace('.', "_"))
            .unwrap_or_default(),
    };
    sanitize_identifier(&raw)
}

pub fn artifact_identifier(base: &str, kind: &EntryKind) -> String {
    match kind {
        EntryKind::Points(_) => format!("{base}_points"),
        EntryKind::Labels(f) => format!("{base}_{}_labels", sanitize_identifier(&f.label_column)),
        EntryKind::GroupLabels(f) => {
            format!("{base}_{}_group_labels", sanitize_identifier(&f.label_column))
        }
        EntryKind::Branches(_) => format!("{base}_branches"),
        EntryKind::Models(_) => format!("{base}_models"),
        EntryKind::Pdb(_) => format!("{base}_proteins"),
    }
}

/// Best-effort name for an entry that may not parse.
fn fallback_label(position: usize, value: &Value) -> String {
    let field = |key: &str| value.get(key).and_then(Value::as_str);
    match (field("name").or_else(|| field("csv_file")), field("type")) {
        (Some(source), Some(kind)) => format!("#{position} {source} ({kind})"),
        (Some(source), None) => format!("#{position} {source}"),
        _ => format!("#{position}"),
    }
}

fn parse_entry(position: usize, value: Value, base_dir: &Path) -> ManifestItem {
    let label = fallback_label(position, &value);
    let invalid = |label: String, reason: String| {
        warn!(entry = %label, reason = %reason, "Invalid manifest entry");
        ManifestItem::Invalid(InvalidEntry {
            position,
            label,
            error: EntryError::Invalid(reason),
        })
    };

    let raw: RawEntry = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(e) => return invalid(label, e.to_string()),
    };
    if let Err(reason) = validate(&raw) {
        return invalid(label, reason);
    }

    let base_name = base_name(&raw.common);
    let identifier = artifact_identifier(&base_name, &raw.kind);

    let colormap = match raw.common.colormap.as_deref() {
        None | Some("default") | Some("crayola") => ColormapSource::Palette,
        Some(path) if path.ends_with(".dat") => ColormapSource::Table(resolve_path(base_dir, path)),
        Some(path) if path.ends_with(".cmap") => {
            ColormapSource::Legend(resolve_path(base_dir, path))
        }
        Some(other) => return invalid(identifier, format!("unknown colormap '{other}'")),
    };

    let points_path = match &raw.kind {
        EntryKind::Branches(b) => Some(resolve_path(base_dir, &b.points_file)),
        _ => None,
    };

    ManifestItem::Valid(Box::new(Entry {
        position,
        csv_path: resolve_path(base_dir, &raw.common.csv_file),
        parent_path: raw
            .common
            .parent
            .as_ref()
            .map(|p| resolve_path(base_dir, &p.csv_file)),
        points_path,
        colormap,
        base_name,
        identifier,
        fade_identifiers: Vec::new(),
        common: raw.common,
        kind: raw.kind,
    }))
}

/// Field checks serde cannot express.
fn validate(raw: &RawEntry) -> Result<(), String> {
    let common = &raw.common;
    if common.csv_file.trim().is_empty() {
        return Err("csv_file is empty".into());
    }
    if !(common.data_scale_factor.is_finite() && common.data_scale_factor > 0.0) {
        return Err(format!(
            "data_scale_factor must be finite and > 0, got {}",
            common.data_scale_factor
        ));
    }
    if common.recenter && common.center.is_some() {
        return Err("recenter and center are mutually exclusive".into());
    }
    if let Some(center) = common.center {
        if center.iter().any(|v| !v.is_finite()) {
            return Err("center must be finite".into());
        }
    }
    if let Some(matrix) = common.axis_transform {
        if matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err("axis_transform must be finite".into());
        }
    }
    if let Some(parent) = &common.parent {
        if parent.parent_column.trim().is_empty() {
            return Err("parent.parent_column is empty".into());
        }
    }

    match &raw.kind {
        EntryKind::Points(p) => {
            if p.point_scale_factor <= 0.0 || !p.point_scale_factor.is_finite() {
                return Err("point_scale_factor must be finite and > 0".into());
            }
            if p.max_size.is_some_and(|m| m <= 0.0 || !m.is_finite()) {
                return Err("max_size must be finite and > 0".into());
            }
        }
        EntryKind::Labels(l) | EntryKind::GroupLabels(l) => {
            if l.label_column.trim().is_empty() {
                return Err("label_column is empty".into());
            }
            if l.label_minsize > l.label_maxsize {
                return Err("label_minsize exceeds label_maxsize".into());
            }
        }
        EntryKind::Branches(b) => {
            if b.points_file.trim().is_empty() {
                return Err("points_file is empty".into());
            }
            if !(0.0..=1.0).contains(&b.opacity) {
                return Err(format!("opacity must be within 0..=1, got {}", b.opacity));
            }
        }
        EntryKind::Models(m) => {
            if m.model_list.is_empty() {
                return Err("model_list is empty".into());
            }
            if m.model_list.iter().any(|p| !(p.model_scale.is_finite() && p.model_scale > 0.0)) {
                return Err("model_scale must be finite and > 0".into());
            }
        }
        EntryKind::Pdb(p) => {
            if p.protein_list.is_empty() {
                return Err("protein_list is empty".into());
            }
            if p.protein_list.iter().any(|p| !(p.scale.is_finite() && p.scale > 0.0)) {
                return Err("protein scale must be finite and > 0".into());
            }
        }
    }
    Ok(())
}

/// A later entry reusing an earlier identifier would overwrite its artifacts.
fn reject_duplicate_identifiers(items: &mut [ManifestItem]) {
    let mut seen: HashSet<String> = HashSet::new();
    for item in items.iter_mut() {
        let ManifestItem::Valid(entry) = item else {
            continue;
        };
        if seen.insert(entry.identifier.clone()) {
            continue;
        }
        let reason = format!("duplicate artifact identifier '{}'", entry.identifier);
        warn!(entry = %entry.identifier, "Duplicate artifact identifier");
        *item = ManifestItem::Invalid(InvalidEntry {
            position: entry.position,
            label: entry.identifier.clone(),
            error: EntryError::Invalid(reason),
        });
    }
}

fn reference_error(entry: &Entry, path: &Path, later: bool) -> ManifestItem {
    let reason = if later {
        format!(
            "references {} which is only declared after this entry",
            path.display()
        )
    } else {
        format!("references {} which no valid entry provides", path.display())
    };
    warn!(entry = %entry.identifier, reason = %reason, "Invalid manifest entry");
    ManifestItem::Invalid(InvalidEntry {
        position: entry.position,
        label: entry.identifier.clone(),
        error: EntryError::Invalid(reason),
    })
}

/// Declared ordering: every reference must name an earlier valid entry.
fn check_backward_references(mut items: Vec<ManifestItem>) -> Vec<ManifestItem> {
    for i in 0..items.len() {
        let ManifestItem::Valid(entry) = &items[i] else {
            continue;
        };
        let mut failure = None;
        for (path, entry_type) in entry.references() {
            let earlier = items[..i].iter().any(|item| match item {
                ManifestItem::Valid(e) => e.provides(path, entry_type),
                ManifestItem::Invalid(_) => false,
            });
            if !earlier {
                let later = items[i + 1..].iter().any(|item| match item {
                    ManifestItem::Valid(e) => e.provides(path, entry_type),
                    ManifestItem::Invalid(_) => false,
                });
                failure = Some(reference_error(entry, path, later));
                break;
            }
        }
        if let Some(invalid) = failure {
            items[i] = invalid;
        }
    }
    items
}

/// Dependency ordering: stable topological sort, ties broken by declaration order.
fn sort_by_dependency(items: Vec<ManifestItem>) -> Result<Vec<ManifestItem>, ManifestError> {
    let (valid, mut invalid): (Vec<ManifestItem>, Vec<ManifestItem>) = items
        .into_iter()
        .partition(|item| matches!(item, ManifestItem::Valid(_)));
    let mut entries: Vec<Box<Entry>> = valid
        .into_iter()
        .filter_map(|item| match item {
            ManifestItem::Valid(entry) => Some(entry),
            ManifestItem::Invalid(_) => None,
        })
        .collect();

    // Entries referencing nothing that exists are invalid before sorting.
    let mut unresolved = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let missing = entries[i].references().into_iter().find(|&(path, entry_type)| {
            !entries
                .iter()
                .enumerate()
                .any(|(j, e)| j != i && e.provides(path, entry_type))
        });
        if let Some((path, _)) = missing {
            let path = path.clone();
            let entry = entries.remove(i);
            unresolved.push(reference_error(&entry, &path, false));
            // A removed provider can orphan entries already checked.
            i = 0;
            continue;
        }
        i += 1;
    }

    let n = entries.len();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];
    for (consumer, entry) in entries.iter().enumerate() {
        let mut providers = BTreeSet::new();
        for (path, entry_type) in entry.references() {
            for (provider, other) in entries.iter().enumerate() {
                if provider != consumer && other.provides(path, entry_type) {
                    providers.insert(provider);
                }
            }
        }
        for provider in providers {
            dependents[provider].push(consumer);
            in_degree[consumer] += 1;
        }
    }

    let mut ready: BTreeSet<(usize, usize)> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(|i| (entries[i].position, i))
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some((_, i)) = ready.pop_first() {
        order.push(i);
        for &d in &dependents[i] {
            in_degree[d] -= 1;
            if in_degree[d] == 0 {
                ready.insert((entries[d].position, d));
            }
        }
    }

    if order.len() < n {
        let cycle: Vec<&str> = (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| entries[i].identifier.as_str())
            .collect();
        return Err(ManifestError::DependencyCycle(cycle.join(", ")));
    }

    let mut slots: Vec<Option<Box<Entry>>> = entries.into_iter().map(Some).collect();
    let mut sorted: Vec<ManifestItem> = order
        .into_iter()
        .filter_map(|i| slots[i].take().map(ManifestItem::Valid))
        .collect();
    invalid.extend(unresolved);
    invalid.sort_by_key(|item| match item {
        ManifestItem::Invalid(e) => e.position,
        ManifestItem::Valid(e) => e.position,
    });
    sorted.extend(invalid);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Manifest {
        Manifest::parse(json, Path::new("/data/manifest.json")).unwrap()
    }

    fn invalid_reason(item: &ManifestItem) -> String {
        match item {
            ManifestItem::Invalid(e) => e.error.to_string(),
            ManifestItem::Valid(e) => panic!("{} unexpectedly valid", e.identifier),
        }
    }

    #[test]
    fn test_missing_datasets_is_fatal() {
        let err = Manifest::parse(r#"{"dataset_name": "Tree"}"#, Path::new("m.json")).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("datasets")));
    }

    #[test]
    fn test_missing_dataset_name_is_fatal() {
        let err = Manifest::parse(r#"{"datasets": []}"#, Path::new("m.json")).unwrap_err();
        assert!(matches!(err, ManifestError::MissingField("dataset_name")));
    }

    #[test]
    fn test_malformed_json_is_fatal() {
        let err = Manifest::parse("{ not json", Path::new("m.json")).unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn test_points_entry_defaults() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "tree.v2.csv", "data_scale_factor": 1000}
            ]}"#,
        );
        let entry = m.entries().next().unwrap();

        assert_eq!(entry.identifier, "tree_v2_points");
        assert_eq!(entry.csv_path, PathBuf::from("/data/tree.v2.csv"));
        assert_eq!(entry.common.units, Units::Km);
        assert!(!entry.is_disabled());
        assert_eq!(entry.gui_path("Tree"), "/Tree");
        let EntryKind::Points(points) = &entry.kind else {
            panic!("expected points");
        };
        assert_eq!(points.point_scale_factor, POINT_SCALE_FACTOR);
    }

    #[test]
    fn test_type_specific_identifiers() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1},
                {"type": "labels", "csv_file": "a.csv", "data_scale_factor": 1, "label_column": "common name"},
                {"type": "group_labels", "csv_file": "a.csv", "data_scale_factor": 1, "label_column": "class"},
                {"type": "branches", "csv_file": "edges.csv", "data_scale_factor": 1, "points_file": "a.csv"},
                {"type": "models", "csv_file": "a.csv", "data_scale_factor": 1, "name": "zoo",
                 "model_list": [{"column": "class", "taxon": "Aves", "model": "bird.glb"}]},
                {"type": "pdb", "csv_file": "a.csv", "data_scale_factor": 1,
                 "protein_list": [{"column": "id", "taxon": 7, "pdb_file": "1abc.pdb"}]}
            ]}"#,
        );
        let ids: Vec<&str> = m.entries().map(|e| e.identifier.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "a_points",
                "a_common_name_labels",
                "a_class_group_labels",
                "edges_branches",
                "zoo_models",
                "a_proteins",
            ]
        );
        let EntryKind::Pdb(pdb) = &m.entries().last().unwrap().kind else {
            panic!("expected pdb");
        };
        assert_eq!(pdb.protein_list[0].taxon, "7");
    }

    #[test]
    fn test_invalid_entries_do_not_stop_parse() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "stars", "csv_file": "a.csv", "data_scale_factor": 1},
                {"type": "branches", "csv_file": "b.csv", "data_scale_factor": 1},
                {"type": "points", "csv_file": "c.csv", "data_scale_factor": -2},
                {"type": "models", "csv_file": "d.csv", "data_scale_factor": 1, "model_list": []},
                {"type": "points", "csv_file": "e.csv", "data_scale_factor": 1}
            ]}"#,
        );
        assert_eq!(m.items.len(), 5);
        assert_eq!(m.entries().count(), 1);
        assert!(invalid_reason(&m.items[1]).contains("points_file"));
        assert!(invalid_reason(&m.items[2]).contains("data_scale_factor"));
        assert!(invalid_reason(&m.items[3]).contains("model_list"));
        assert_eq!(m.items[0].label(), "#0 a.csv (stars)");
    }

    #[test]
    fn test_duplicate_identifier_invalidates_later_entry() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1},
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 2}
            ]}"#,
        );
        assert!(matches!(m.items[0], ManifestItem::Valid(_)));
        assert!(invalid_reason(&m.items[1]).contains("duplicate"));
    }

    #[test]
    fn test_forward_parent_reference_is_invalid_when_declared() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "species.csv", "data_scale_factor": 1000,
                 "parent": {"csv_file": "classes.csv", "parent_column": "class", "parent_point": "Mammalia"}},
                {"type": "points", "csv_file": "classes.csv", "data_scale_factor": 1}
            ]}"#,
        );
        assert!(invalid_reason(&m.items[0]).contains("only declared after"));
        assert_eq!(m.entries().count(), 1);
    }

    #[test]
    fn test_dependency_ordering_sorts_parents_first() {
        let m = parse(
            r#"{"dataset_name": "Tree", "ordering": "dependency", "datasets": [
                {"type": "branches", "csv_file": "edges.csv", "data_scale_factor": 1, "points_file": "species.csv"},
                {"type": "points", "csv_file": "species.csv", "data_scale_factor": 1000,
                 "parent": {"csv_file": "classes.csv", "parent_column": "class", "parent_point": "Mammalia"}},
                {"type": "points", "csv_file": "classes.csv", "data_scale_factor": 1}
            ]}"#,
        );
        let ids: Vec<&str> = m.entries().map(|e| e.identifier.as_str()).collect();
        assert_eq!(ids, vec!["classes_points", "species_points", "edges_branches"]);
    }

    #[test]
    fn test_dependency_cycle_is_fatal() {
        let err = Manifest::parse(
            r#"{"dataset_name": "Tree", "ordering": "dependency", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1,
                 "parent": {"csv_file": "b.csv", "parent_column": "id", "parent_point": "x"}},
                {"type": "points", "csv_file": "b.csv", "data_scale_factor": 1,
                 "parent": {"csv_file": "a.csv", "parent_column": "id", "parent_point": "y"}}
            ]}"#,
            Path::new("m.json"),
        )
        .unwrap_err();
        assert!(matches!(err, ManifestError::DependencyCycle(ref ids) if ids.contains("a_points")));
    }

    #[test]
    fn test_fade_targets_resolve_to_identifiers() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1, "fade_targets": ["b", "ghost"]},
                {"type": "points", "csv_file": "b.csv", "data_scale_factor": 1},
                {"type": "labels", "csv_file": "b.csv", "data_scale_factor": 1, "label_column": "name"}
            ]}"#,
        );
        let entry = m.entries().next().unwrap();
        assert_eq!(entry.fade_identifiers, vec!["b_points", "b_name_labels"]);
    }

    #[test]
    fn test_colormap_sources() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1, "colormap": "colors/crayola.dat"},
                {"type": "points", "csv_file": "b.csv", "data_scale_factor": 1, "colormap": "a_points.cmap"},
                {"type": "points", "csv_file": "c.csv", "data_scale_factor": 1, "colormap": "viridis"}
            ]}"#,
        );
        let sources: Vec<&ColormapSource> = m.entries().map(|e| &e.colormap).collect();
        assert_eq!(
            sources,
            vec![
                &ColormapSource::Table(PathBuf::from("/data/colors/crayola.dat")),
                &ColormapSource::Legend(PathBuf::from("/data/a_points.cmap")),
            ]
        );
        assert!(invalid_reason(&m.items[2]).contains("viridis"));
    }

    #[test]
    fn test_disabled_and_skipped() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1, "enabled": false},
                {"type": "points", "csv_file": "b.csv", "data_scale_factor": 1, "skip": true}
            ]}"#,
        );
        assert!(m.entries().all(Entry::is_disabled));
    }

    #[test]
    fn test_flags_accept_zero_and_one() {
        let m = parse(
            r#"{"dataset_name": "Tree", "datasets": [
                {"type": "points", "csv_file": "a.csv", "data_scale_factor": 1, "enabled": 0},
                {"type": "points", "csv_file": "b.csv", "data_scale_factor": 1, "enabled": 1},
                {"type": "points", "csv_file": "c.csv", "data_scale_factor": 1, "enabled": 1, "skip": 1},
                {"type": "points", "csv_file": "d.csv", "data_scale_factor": 1, "enabled": 2}
            ]}"#,
        );
        let disabled: Vec<bool> = m.entries().map(Entry::is_disabled).collect();
        assert_eq!(disabled, vec![true, false, true]);
        assert!(invalid_reason(&m.items[3]).contains("found 2"));
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("common name"), "common_name");
        assert_eq!(sanitize_identifier("2019-tree"), "_2019_tree");
        assert_eq!(sanitize_identifier(""), "_");
    }

    #[test]
    fn test_resolve_path_drops_current_dir() {
        assert_eq!(
            resolve_path(Path::new("/data"), "./a.csv"),
            PathBuf::from("/data/a.csv")
        );
        assert_eq!(resolve_path(Path::new("/data"), "/abs/b.csv"), PathBuf::from("/abs/b.csv"));
    }
}
