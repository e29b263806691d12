//! Scene compiler orchestrating every manifest entry of a run.
//!
//! Entries are processed strictly in manifest order. Each one is loaded,
//! anchored to its parent, transformed, colored and written as one artifact
//! set. A failing entry is recorded in the run summary and the run moves on.

use constants::palette::GRAY_COLOR;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::bounds::DatasetBounds;
use crate::cache::CacheInvalidator;
use crate::colors::{ColorAssignment, ColorTable, Rgba, color_columns, color_rows, row_value};
use crate::config::{CompilerConfig, ConfigError};
use crate::coordinates::{Placement, Projection, TransformSpec, TransformedRows, transform};
use crate::deploy::Deployer;
use crate::error::{EntryError, ManifestError};
use crate::manifest::{
    BranchesFields, ColormapSource, Entry, EntryKind, EntryType, LabelsFields, Manifest, ManifestItem,
    PointsFields, resolve_path, sanitize_identifier,
};
use crate::reference::{ReferenceError, Registry, ResolvedDataset, resolve_edges, resolve_parent};
use crate::summary::{DropReason, EntryReport, RowDrops, RunStage, RunSummary};
use crate::table::Table;
use crate::writer::data_files::{
    POINTS_HEADER, load_cmap, render_branch_names, render_cmap, render_labels, render_speck,
    write_points, write_text,
};
use crate::writer::descriptor::{
    ColorMapping, Geometry, LineStyle, PlacedNode, branches_asset, labels_asset, models_asset,
    pdb_asset, points_asset,
};
use crate::writer::scene_index::{AnchorRecord, PlacementRecord, SceneIndexWriter};
use crate::writer::{ArtifactRecord, BranchRecord, LabelRecord, NodeContext, PointRecord};

/// Failures that stop a run. Entry failures never do, and neither do the
/// scene index, cache and deploy steps, which land in the summary instead.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Compiles a manifest into artifact sets in the configured output directory.
pub struct SceneCompiler {
    config: CompilerConfig,
}

impl SceneCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Load the configured manifest and compile it.
    pub fn run(&self) -> Result<RunSummary, CompileError> {
        self.config.prepare()?;
        let manifest = Manifest::load(&self.config.manifest_path)?;
        info!(
            manifest = %self.config.manifest_path.display(),
            dataset = %manifest.dataset_name,
            entries = manifest.items.len(),
            "Compiling scene"
        );
        self.compile(&manifest)
    }

    /// Compile an already parsed manifest.
    pub fn compile(&self, manifest: &Manifest) -> Result<RunSummary, CompileError> {
        let output_dir = &self.config.output_dir;
        fs::create_dir_all(output_dir).map_err(|source| ConfigError::OutputDir {
            path: output_dir.clone(),
            source,
        })?;

        let palette = manifest.palette()?;
        let mut run = RunState::new(manifest, palette, output_dir);
        let mut summary = RunSummary::default();

        let progress = self.progress_bar(manifest.items.len());
        for item in &manifest.items {
            progress.set_message(item.label().to_string());
            match item {
                ManifestItem::Invalid(invalid) => {
                    summary.skip(invalid.label.clone(), invalid.error.to_string());
                }
                ManifestItem::Valid(entry) => match run.process(entry) {
                    Ok(report) => summary.processed.push(report),
                    Err(e) => {
                        warn!(entry = %entry.identifier, error = %e, "Entry skipped");
                        summary.skip(entry.identifier.clone(), e.to_string());
                    }
                },
            }
            progress.inc(1);
        }
        progress.finish_and_clear();

        let index = SceneIndexWriter::new(output_dir, &manifest.dataset_name);
        match index.write(run.artifacts) {
            Ok(files) => summary.index_files = files,
            Err(e) => summary.fail(RunStage::SceneIndex, e),
        }

        let written = summary.written_files();
        let textures: Vec<String> = run.textures.into_iter().collect();

        // Stale cache entries would shadow the files just written.
        if let Some(cache_dir) = &self.config.cache_dir {
            let names = Deployer::deployed_names(&written, &textures);
            match CacheInvalidator::new(cache_dir).invalidate(names) {
                Ok(report) => summary.cache_removed = report.removed,
                Err(e) => summary.fail(RunStage::Cache, e),
            }
        }
        if let Some(asset_dir) = &self.config.asset_dir {
            let deployer = Deployer::new(asset_dir, self.config.texture_dir.as_deref());
            match deployer.deploy(&written, &textures) {
                Ok(deployed) => summary.deployed = deployed,
                Err(e) => summary.fail(RunStage::Deploy, e),
            }
        }

        summary.log();
        Ok(summary)
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{bar:40.cyan/blue}] {pos}/{len} entries ({percent}%) {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("▉▊▋▌▍▎▏ "),
        );
        pb
    }
}

/// Files written for one entry. Removed again if the entry fails halfway.
struct Outputs {
    dir: PathBuf,
    data_files: Vec<PathBuf>,
    descriptor: Option<PathBuf>,
    /// Resources already in the output directory, never removed.
    kept: Vec<PathBuf>,
}

impl Outputs {
    fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            data_files: Vec::new(),
            descriptor: None,
            kept: Vec::new(),
        }
    }

    fn text(&mut self, name: &str, contents: &str) -> Result<(), EntryError> {
        let path = self.dir.join(name);
        write_text(&path, contents)?;
        self.data_files.push(path);
        Ok(())
    }

    fn points(&mut self, name: &str, aux: &[String], records: &[PointRecord]) -> Result<(), EntryError> {
        let path = self.dir.join(name);
        write_points(&path, aux, records)?;
        self.data_files.push(path);
        Ok(())
    }

    /// Copy a local resource next to the descriptor, once.
    fn copy(&mut self, source: &Path) -> Result<String, EntryError> {
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| EntryError::invalid(format!("{} is not a file", source.display())))?;
        let target = self.dir.join(&name);
        if self.data_files.contains(&target) {
            return Ok(name);
        }
        if source == target {
            self.kept.push(target.clone());
        } else {
            fs::copy(source, &target).map_err(|e| EntryError::write(&target, e))?;
        }
        self.data_files.push(target);
        Ok(name)
    }

    fn descriptor(&mut self, identifier: &str, contents: &str) -> Result<(), EntryError> {
        let path = self.dir.join(format!("{identifier}.asset"));
        write_text(&path, contents)?;
        self.descriptor = Some(path);
        Ok(())
    }

    fn data_file_names(&self) -> Vec<String> {
        self.data_files
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    fn into_files(self) -> Vec<PathBuf> {
        let mut files = self.data_files;
        files.extend(self.descriptor);
        files
    }

    fn discard(self) {
        let kept = self.kept.clone();
        for path in self.into_files().into_iter().filter(|p| !kept.contains(p)) {
            if let Err(e) = fs::remove_file(&path) {
                debug!(file = %path.display(), error = %e, "Could not remove partial artifact");
            }
        }
    }
}

/// What an emitter produced beyond its files.
#[derive(Default)]
struct Emission {
    rows: usize,
    drops: RowDrops,
    placements: Vec<PlacementRecord>,
    bounds: Option<DatasetBounds>,
}

/// A model or molecule placement, normalized across entry types.
struct NodeSpec<'a> {
    column: &'a str,
    taxon: &'a str,
    file: &'a str,
    scale: f64,
    enabled: bool,
    name: Option<&'a str>,
}

/// Running tally of one group label.
struct Group<'t> {
    value: &'t str,
    first: [f64; 3],
    sum: [f64; 3],
    count: usize,
}

/// Mutable state of one run, dropped when the run ends.
struct RunState<'m> {
    manifest: &'m Manifest,
    output_dir: PathBuf,
    palette: ColorTable,
    registry: Registry,
    shared_colors: HashMap<String, ColorAssignment>,
    textures: BTreeSet<String>,
    artifacts: Vec<ArtifactRecord>,
}

impl<'m> RunState<'m> {
    fn new(manifest: &'m Manifest, palette: ColorTable, output_dir: &Path) -> Self {
        Self {
            manifest,
            output_dir: output_dir.to_path_buf(),
            palette,
            registry: Registry::new(),
            shared_colors: HashMap::new(),
            textures: BTreeSet::new(),
            artifacts: Vec::new(),
        }
    }

    fn process(&mut self, entry: &Entry) -> Result<EntryReport, EntryError> {
        debug!(entry = %entry.identifier, kind = %entry.entry_type(), "Processing entry");

        if let EntryKind::Branches(fields) = &entry.kind {
            if entry.is_disabled() {
                return Ok(disabled_report(entry, RowDrops::new()));
            }
            return self.emit_guarded(entry, None, RowDrops::new(), |run, ctx, out| {
                run.emit_branches(entry, fields, ctx, out)
            });
        }

        let table = Table::load(&entry.csv_path, entry.common.id_column.as_deref())?;
        let (placement, anchor) = self.placement(entry)?;
        let placed = transform(&table, &entry.transform_spec(), &placement)?;

        let report = if entry.is_disabled() {
            debug!(entry = %entry.identifier, "Disabled, resolving for references only");
            disabled_report(entry, placed.drops.clone())
        } else {
            let drops = placed.drops.clone();
            self.emit_guarded(entry, anchor, drops, |run, ctx, out| match &entry.kind {
                EntryKind::Points(fields) => run.emit_points(entry, fields, &table, &placed, ctx, out),
                EntryKind::Labels(fields) => run.emit_labels(entry, fields, &table, &placed, ctx, out),
                EntryKind::GroupLabels(fields) => {
                    run.emit_group_labels(fields, &table, &placed, placement.offset, ctx, out)
                }
                EntryKind::Models(fields) => {
                    let specs = fields.model_list.iter().map(|m| NodeSpec {
                        column: &m.column,
                        taxon: &m.taxon,
                        file: &m.model,
                        scale: m.model_scale,
                        enabled: m.enabled,
                        name: m.name.as_deref(),
                    });
                    let (nodes, emission) = run.place_nodes(entry, specs, &table, &placed, ctx, out)?;
                    out.descriptor(&entry.identifier, &models_asset(ctx, &nodes)?)?;
                    Ok(emission)
                }
                EntryKind::Pdb(fields) => {
                    let specs = fields.protein_list.iter().map(|p| NodeSpec {
                        column: &p.column,
                        taxon: &p.taxon,
                        file: &p.pdb_file,
                        scale: p.scale,
                        enabled: true,
                        name: p.name.as_deref(),
                    });
                    let (nodes, emission) = run.place_nodes(entry, specs, &table, &placed, ctx, out)?;
                    out.descriptor(&entry.identifier, &pdb_asset(ctx, &nodes)?)?;
                    Ok(emission)
                }
                EntryKind::Branches(_) => Ok(Emission::default()),
            })?
        };

        self.registry.register(ResolvedDataset::new(
            entry.identifier.clone(),
            entry.csv_path.clone(),
            entry.entry_type(),
            table,
            placed,
        ));
        Ok(report)
    }

    /// Parent anchor of `entry`, or the plain scale when it has none.
    fn placement(&self, entry: &Entry) -> Result<(Placement, Option<AnchorRecord>), EntryError> {
        let scale = entry.common.data_scale_factor;
        let (Some(parent), Some(path)) = (&entry.common.parent, &entry.parent_path) else {
            return Ok((Placement::unanchored(scale), None));
        };
        let placement = resolve_parent(parent, path, &self.registry, scale)?;
        let dataset = self
            .registry
            .lookup(path, parent.parent_type)
            .map(|d| d.identifier.clone())
            .unwrap_or_else(|| parent.csv_file.clone());
        debug!(
            entry = %entry.identifier,
            parent = %dataset,
            offset = ?placement.offset,
            "Resolved parent anchor"
        );
        let anchor = AnchorRecord {
            dataset,
            column: parent.parent_column.clone(),
            value: parent.parent_point.clone(),
            offset: placement.offset,
        };
        Ok((placement, Some(anchor)))
    }

    fn node_context(&self, entry: &Entry, anchor: Option<&AnchorRecord>) -> NodeContext {
        let dataset_name = &self.manifest.dataset_name;
        NodeContext {
            identifier: entry.identifier.clone(),
            dataset_name: dataset_name.clone(),
            source_name: entry.common.csv_file.clone(),
            gui_name: entry.gui_name(),
            gui_path: entry.gui_path(dataset_name),
            hidden: entry.common.gui_info.hidden,
            units: entry.common.units,
            description: anchor
                .map(|a| format!("Anchored to {} at {} = {}", a.dataset, a.column, a.value)),
            fade_targets: entry.fade_identifiers.clone(),
        }
    }

    /// Run an emitter, recording its artifact set or removing its partial files.
    /// `drops` are the rows already lost before emission.
    fn emit_guarded<F>(
        &mut self,
        entry: &Entry,
        anchor: Option<AnchorRecord>,
        mut drops: RowDrops,
        emit: F,
    ) -> Result<EntryReport, EntryError>
    where
        F: FnOnce(&mut Self, &NodeContext, &mut Outputs) -> Result<Emission, EntryError>,
    {
        let ctx = self.node_context(entry, anchor.as_ref());
        let mut out = Outputs::new(&self.output_dir);
        let emission = match emit(self, &ctx, &mut out) {
            Ok(emission) => emission,
            Err(e) => {
                out.discard();
                return Err(e);
            }
        };

        drops.merge(&emission.drops);
        let descriptor = out
            .descriptor
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.artifacts.push(ArtifactRecord {
            identifier: entry.identifier.clone(),
            entry_type: entry.entry_type(),
            source: entry.common.csv_file.clone(),
            descriptor,
            data_files: out.data_file_names(),
            fade_targets: entry.fade_identifiers.clone(),
            anchor,
            placements: emission.placements,
            rows: emission.rows,
            dropped_rows: drops.total(),
            bounds: emission.bounds,
        });

        Ok(EntryReport {
            identifier: entry.identifier.clone(),
            entry_type: entry.entry_type(),
            rows_written: emission.rows,
            drops,
            files: out.into_files(),
            disabled: false,
        })
    }

    /// Palette for `entry`: its own `.dat` table or the run palette.
    fn entry_palette(&self, entry: &Entry) -> Result<ColorTable, EntryError> {
        match &entry.colormap {
            ColormapSource::Table(path) => Ok(ColorTable::load(path)?),
            ColormapSource::Palette | ColormapSource::Legend(_) => Ok(self.palette.clone()),
        }
    }

    /// Assignment an entry starts from, with its overrides pinned.
    fn start_colors(&self, entry: &Entry, palette: &ColorTable) -> Result<ColorAssignment, EntryError> {
        let shared = entry
            .common
            .shared_colormap
            .as_ref()
            .and_then(|name| self.shared_colors.get(name));
        let mut assignment = match (shared, &entry.colormap) {
            (Some(shared), _) => shared.clone(),
            (None, ColormapSource::Legend(path)) => load_cmap(&self.legend_path(entry, path))?,
            (None, _) => ColorAssignment::new(),
        };
        assignment.pin_overrides(&entry.common.color_overrides, palette)?;
        Ok(assignment)
    }

    /// A bare legend name that an earlier entry of this run wrote reads that
    /// fresh file, not whatever sits next to the manifest.
    fn legend_path(&self, entry: &Entry, path: &Path) -> PathBuf {
        let written = entry.common.colormap.as_deref().filter(|name| {
            !name.contains(['/', '\\'])
                && self
                    .artifacts
                    .iter()
                    .any(|a| a.data_files.iter().any(|f| f.as_str() == *name))
        });
        match written {
            Some(name) => {
                debug!(entry = %entry.identifier, legend = %name, "Using legend written this run");
                self.output_dir.join(name)
            }
            None => path.to_path_buf(),
        }
    }

    fn share_colors(&mut self, entry: &Entry, assignment: &ColorAssignment) {
        if let Some(name) = &entry.common.shared_colormap {
            self.shared_colors.insert(name.clone(), assignment.clone());
        }
    }

    fn emit_points(
        &mut self,
        entry: &Entry,
        fields: &PointsFields,
        table: &Table,
        placed: &TransformedRows,
        ctx: &NodeContext,
        out: &mut Outputs,
    ) -> Result<Emission, EntryError> {
        let id = &entry.identifier;
        let columns = color_columns(table, &entry.common.color_by_columns);
        let (colors, mapping, assignment) = if columns.is_empty() {
            remove_stale(&self.output_dir.join(format!("{id}.cmap")));
            (vec![0; placed.len()], None, None)
        } else {
            let palette = self.entry_palette(entry)?;
            let mut assignment = self.start_colors(entry, &palette)?;
            let colors = color_rows(table, &placed.rows, &columns, &mut assignment, &palette);
            let cmap = format!("{id}.cmap");
            out.text(&cmap, &render_cmap(id, &assignment)?)?;
            let mapping = ColorMapping {
                file: cmap,
                max_index: assignment.len(),
            };
            (colors, Some(mapping), Some(assignment))
        };

        let spec = entry.transform_spec();
        let excluded = coordinate_columns(&spec);
        let aux: Vec<usize> = table
            .headers()
            .iter()
            .enumerate()
            .filter(|&(i, name)| {
                i != table.id_index()
                    && !excluded.contains(&name.as_str())
                    && !POINTS_HEADER.contains(&name.as_str())
            })
            .map(|(i, _)| i)
            .collect();
        let aux_headers: Vec<String> = aux.iter().map(|&i| table.headers()[i].clone()).collect();

        let records: Vec<PointRecord> = placed
            .iter()
            .zip(colors)
            .map(|((row, position), color)| PointRecord {
                id: table.id(row).to_string(),
                position,
                color,
                aux: aux.iter().map(|&c| table.value(row, c).to_string()).collect(),
            })
            .collect();

        let data_file = format!("{id}.csv");
        out.points(&data_file, &aux_headers, &records)?;
        out.descriptor(id, &points_asset(ctx, fields, &data_file, mapping.as_ref())?)?;

        if let Some(assignment) = &assignment {
            self.share_colors(entry, assignment);
        }
        if let Some(texture) = &fields.default_texture {
            self.textures.insert(texture.clone());
        }

        Ok(Emission {
            rows: records.len(),
            bounds: bounds_of(&placed.positions),
            ..Default::default()
        })
    }

    fn emit_labels(
        &self,
        entry: &Entry,
        fields: &LabelsFields,
        table: &Table,
        placed: &TransformedRows,
        ctx: &NodeContext,
        out: &mut Outputs,
    ) -> Result<Emission, EntryError> {
        let column = table.require_column(&fields.label_column)?;
        let mut drops = RowDrops::new();
        let mut positions = Vec::with_capacity(placed.len());
        let records: Vec<LabelRecord> = placed
            .iter()
            .filter_map(|(row, position)| {
                let text = table.value(row, column);
                if text.is_empty() {
                    drops.record(DropReason::EmptyLabel);
                    return None;
                }
                positions.push(position);
                Some(LabelRecord {
                    id: table.id(row).to_string(),
                    position,
                    text: text.to_string(),
                })
            })
            .collect();

        let label_file = format!("{}.label", entry.identifier);
        out.text(&label_file, &render_labels(&records)?)?;
        out.descriptor(&entry.identifier, &labels_asset(ctx, fields, &label_file)?)?;

        Ok(Emission {
            rows: records.len(),
            drops,
            bounds: bounds_of(&positions),
            ..Default::default()
        })
    }

    /// One label per distinct value, at the group centroid.
    fn emit_group_labels(
        &self,
        fields: &LabelsFields,
        table: &Table,
        placed: &TransformedRows,
        origin: [f64; 3],
        ctx: &NodeContext,
        out: &mut Outputs,
    ) -> Result<Emission, EntryError> {
        let column = table.require_column(&fields.label_column)?;
        let mut drops = RowDrops::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for (row, position) in placed.iter() {
            let value = table.value(row, column);
            if value.is_empty() {
                drops.record(DropReason::EmptyLabel);
                continue;
            }
            let i = *index.entry(value).or_insert_with(|| {
                groups.push(Group {
                    value,
                    first: position,
                    sum: [0.0; 3],
                    count: 0,
                });
                groups.len() - 1
            });
            let group = &mut groups[i];
            for axis in 0..3 {
                group.sum[axis] += position[axis];
            }
            group.count += 1;
        }

        let records: Vec<LabelRecord> = groups
            .iter()
            .filter_map(|group| {
                let Some(position) = group_anchor(group, origin, fields.on_sphere) else {
                    warn!(
                        entry = %ctx.identifier,
                        group = %group.value,
                        "Group centroid cannot be placed on the sphere, label skipped"
                    );
                    return None;
                };
                let text = if group.count > 1 {
                    format!("{} ({})", group.value, group.count)
                } else {
                    group.value.to_string()
                };
                Some(LabelRecord {
                    id: group.value.to_string(),
                    position,
                    text,
                })
            })
            .collect();

        let label_file = format!("{}.label", ctx.identifier);
        out.text(&label_file, &render_labels(&records)?)?;
        out.descriptor(&ctx.identifier, &labels_asset(ctx, fields, &label_file)?)?;

        let positions: Vec<[f64; 3]> = records.iter().map(|r| r.position).collect();
        Ok(Emission {
            rows: records.len(),
            drops,
            bounds: bounds_of(&positions),
            ..Default::default()
        })
    }

    fn emit_branches(
        &mut self,
        entry: &Entry,
        fields: &BranchesFields,
        ctx: &NodeContext,
        out: &mut Outputs,
    ) -> Result<Emission, EntryError> {
        let table = Table::load_edges(&entry.csv_path)?;
        let from_column = table.require_column(&fields.from_column)?;
        let to_column = table.require_column(&fields.to_column)?;
        let points_path = entry
            .points_path
            .as_deref()
            .ok_or_else(|| EntryError::invalid("branches entry without points_file"))?;
        let dataset = self
            .registry
            .lookup(points_path, Some(EntryType::Points))
            .or_else(|| self.registry.lookup(points_path, None))
            .ok_or_else(|| ReferenceError::UnknownDataset(fields.points_file.clone()))?;

        let mut drops = RowDrops::new();
        let mut edges = Vec::with_capacity(table.len());
        for row in 0..table.len() {
            let from = table.value(row, from_column);
            let to = table.value(row, to_column);
            if from.is_empty() || to.is_empty() {
                drops.record(DropReason::MissingEndpoint);
                continue;
            }
            edges.push((row, from, to));
        }
        let resolution = resolve_edges(edges, dataset);
        drops.add(DropReason::MissingEndpoint, resolution.missing);

        // Index 1 is the no-value gray, categories follow.
        let columns = color_columns(&table, &entry.common.color_by_columns);
        let mut assignment = None;
        if !columns.is_empty() {
            let palette = self.entry_palette(entry)?;
            let mut colors = self.start_colors(entry, &palette)?;
            for edge in &resolution.edges {
                if let Some(value) = row_value(&table, edge.row, &columns) {
                    colors.assign(value, &palette);
                }
            }
            assignment = Some(colors);
        }
        let color_of = |row: usize| {
            assignment
                .as_ref()
                .and_then(|a| row_value(&table, row, &columns).and_then(|v| a.index_of(v)))
                .map_or(1, |i| i + 1)
        };

        let records: Vec<BranchRecord> = resolution
            .edges
            .iter()
            .map(|edge| BranchRecord {
                id: mesh_id(&edge.from_id, &edge.to_id),
                from: edge.from,
                to: edge.to,
                color: color_of(edge.row),
            })
            .collect();

        let mut line_colors = vec![Rgba::gray(GRAY_COLOR)];
        if let Some(assignment) = &assignment {
            line_colors.extend(assignment.entries().iter().map(|a| a.color.rgba));
        }
        let style = LineStyle {
            width: fields.line_width,
            opacity: fields.opacity,
            colors: line_colors,
        };

        let speck = format!("{}.speck", entry.identifier);
        let names = format!("{}.dat", entry.identifier);
        out.text(&speck, &render_speck(&records)?)?;
        out.text(&names, &render_branch_names(&records)?)?;
        out.descriptor(&entry.identifier, &branches_asset(ctx, &style, &speck, &names)?)?;

        if let Some(assignment) = &assignment {
            self.share_colors(entry, assignment);
        }
        let endpoints: Vec<[f64; 3]> = records.iter().flat_map(|r| [r.from, r.to]).collect();
        Ok(Emission {
            rows: records.len(),
            drops,
            bounds: bounds_of(&endpoints),
            ..Default::default()
        })
    }

    /// Place a node at every row whose `column` matches a spec's `taxon`.
    fn place_nodes<'s>(
        &self,
        entry: &Entry,
        specs: impl Iterator<Item = NodeSpec<'s>>,
        table: &Table,
        placed: &TransformedRows,
        ctx: &NodeContext,
        out: &mut Outputs,
    ) -> Result<(Vec<PlacedNode>, Emission), EntryError> {
        let mut emission = Emission::default();
        let mut nodes = Vec::new();
        let mut used: HashSet<String> = HashSet::new();

        for spec in specs {
            let column = table.require_column(spec.column)?;
            let matches: Vec<(usize, [f64; 3])> = placed
                .iter()
                .filter(|&(row, _)| table.value(row, column) == spec.taxon)
                .collect();
            if matches.is_empty() {
                warn!(
                    entry = %entry.identifier,
                    column = %spec.column,
                    taxon = %spec.taxon,
                    "No row matches placement"
                );
                emission.drops.record(DropReason::UnmatchedPlacement);
                continue;
            }

            let Some(geometry) = self.geometry(spec.file, out)? else {
                emission.drops.record(DropReason::MissingAsset);
                continue;
            };
            let stem = Path::new(spec.file)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let base = format!(
                "{}_{}_{}",
                entry.base_name,
                sanitize_identifier(spec.taxon),
                sanitize_identifier(&stem)
            );
            let name = spec
                .name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{} {}", spec.taxon, stem));

            for &(row, position) in &matches {
                let row_id = table.id(row);
                let (candidate, node_name) = if matches.len() > 1 {
                    (
                        format!("{base}_{}", sanitize_identifier(row_id)),
                        format!("{name} ({row_id})"),
                    )
                } else {
                    (base.clone(), name.clone())
                };
                let identifier = unique_identifier(&mut used, candidate);
                emission.placements.push(PlacementRecord {
                    identifier: identifier.clone(),
                    row_id: row_id.to_string(),
                });
                nodes.push(PlacedNode {
                    identifier,
                    name: node_name,
                    position,
                    scale: spec.scale,
                    enabled: spec.enabled,
                    geometry: geometry.clone(),
                    gui_path: format!("{}/{}", ctx.gui_path, spec.taxon),
                    description: format!(
                        "Anchored to row {row_id} ({} = {})",
                        spec.column, spec.taxon
                    ),
                });
            }
        }

        let positions: Vec<[f64; 3]> = nodes.iter().map(|n| n.position).collect();
        emission.rows = nodes.len();
        emission.bounds = bounds_of(&positions);
        Ok((nodes, emission))
    }

    /// Remote geometry is fetched by the host, local files ship with the descriptor.
    fn geometry(&self, file: &str, out: &mut Outputs) -> Result<Option<Geometry>, EntryError> {
        if file.starts_with("http://") || file.starts_with("https://") {
            let file_name = file
                .rsplit('/')
                .next()
                .unwrap_or(file)
                .replace("%20", "_")
                .replace(' ', "_");
            return Ok(Some(Geometry::Url {
                url: file.to_string(),
                file_name,
            }));
        }
        let source = resolve_path(&self.manifest.base_dir, file);
        if !source.is_file() {
            warn!(file = %source.display(), "Model file not found, placement skipped");
            return Ok(None);
        }
        let file_name = out.copy(&source)?;
        Ok(Some(Geometry::Local { file_name }))
    }
}

fn disabled_report(entry: &Entry, drops: RowDrops) -> EntryReport {
    EntryReport {
        identifier: entry.identifier.clone(),
        entry_type: entry.entry_type(),
        rows_written: 0,
        drops,
        files: Vec::new(),
        disabled: true,
    }
}

/// Columns consumed as coordinates, kept out of the auxiliary columns.
fn coordinate_columns(spec: &TransformSpec) -> Vec<&str> {
    match &spec.projection {
        Projection::Planar => vec![
            spec.x_column.as_str(),
            spec.y_column.as_str(),
            spec.z_column.as_str(),
        ],
        Projection::Spherical {
            radius_column,
            longitude_column,
            latitude_column,
            ..
        } => vec![
            radius_column.as_str(),
            longitude_column.as_str(),
            latitude_column.as_str(),
        ],
    }
}

/// Remove an artifact an earlier run left behind that this run no longer writes.
fn remove_stale(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(file = %path.display(), "Removed stale artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "Could not remove stale artifact"),
    }
}

fn bounds_of(positions: &[[f64; 3]]) -> Option<DatasetBounds> {
    if positions.is_empty() {
        None
    } else {
        Some(DatasetBounds::from_positions(positions))
    }
}

fn mesh_id(from: &str, to: &str) -> String {
    format!("{from}_{to}")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn unique_identifier(used: &mut HashSet<String>, candidate: String) -> String {
    if used.insert(candidate.clone()) {
        return candidate;
    }
    let mut n = 2;
    loop {
        let next = format!("{candidate}_{n}");
        if used.insert(next.clone()) {
            return next;
        }
        n += 1;
    }
}

fn length(p: [f64; 3]) -> f64 {
    (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt()
}

/// Group centroid, optionally pushed out to the radius of the group's first
/// point around `origin`.
fn group_anchor(group: &Group, origin: [f64; 3], on_sphere: bool) -> Option<[f64; 3]> {
    let n = group.count as f64;
    let centroid = [group.sum[0] / n, group.sum[1] / n, group.sum[2] / n];
    if !on_sphere {
        return Some(centroid);
    }

    let local = [
        centroid[0] - origin[0],
        centroid[1] - origin[1],
        centroid[2] - origin[2],
    ];
    let norm = length(local);
    if !(norm > 0.0 && norm.is_finite()) {
        return None;
    }
    let radius = length([
        group.first[0] - origin[0],
        group.first[1] - origin[1],
        group.first[2] - origin[2],
    ]);
    let k = radius / norm;
    Some([
        origin[0] + local[0] * k,
        origin[1] + local[1] * k,
        origin[2] + local[2] * k,
    ])
}
