//! Lua asset descriptors in the host's scene-description syntax.
//!
//! Every descriptor follows the same skeleton: requires, unit constants,
//! actions, an invisible position node parented to the Earth center, the
//! renderable nodes, then registration in `onInitialize` and removal in
//! reverse order in `onDeinitialize`.

use constants::render_settings::{APPROACH_FACTOR, REACH_FACTOR};
use std::fmt::{self, Write as _};

use crate::colors::Rgba;
use crate::deploy::deployed_name;
use crate::manifest::{LabelsFields, PointsFields, Units};

/// Quote a string as a Lua literal.
pub fn lua_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Shared placement and GUI settings for one descriptor.
#[derive(Debug, Clone)]
pub struct NodeContext {
    pub identifier: String,
    pub dataset_name: String,
    pub source_name: String,
    pub gui_name: String,
    pub gui_path: String,
    pub hidden: bool,
    pub units: Units,
    /// Set for entries anchored to another dataset's row.
    pub description: Option<String>,
    pub fade_targets: Vec<String>,
}

impl NodeContext {
    fn position_var(&self) -> String {
        format!("{}_position", self.identifier)
    }

    fn fade_var(&self) -> String {
        format!("{}_fade", self.identifier)
    }

    fn unit_var(&self) -> String {
        format!("meters_in_{}", self.units.as_str())
    }
}

struct Action {
    var: String,
    name: String,
    commands: Vec<String>,
    documentation: String,
    gui_path: String,
    is_local: bool,
}

/// Incremental builder for one `.asset` file.
struct LuaAsset {
    header: String,
    body: String,
    actions: Vec<Action>,
    nodes: Vec<String>,
}

impl LuaAsset {
    fn new(ctx: &NodeContext) -> Result<Self, fmt::Error> {
        let mut header = String::new();
        writeln!(
            header,
            "-- {} for {}, generated from {}",
            ctx.identifier, ctx.dataset_name, ctx.source_name
        )?;
        writeln!(
            header,
            "local earthTransforms = asset.require(\"scene/solarsystem/planets/earth/transforms\")"
        )?;
        writeln!(header)?;
        writeln!(header, "local {} = {}", ctx.unit_var(), ctx.units.meters())?;
        writeln!(header)?;

        let mut asset = Self {
            header,
            body: String::new(),
            actions: Vec::new(),
            nodes: Vec::new(),
        };
        asset.position_node(ctx)?;
        Ok(asset)
    }

    /// Invisible anchor node. Data files already carry absolute positions.
    fn position_node(&mut self, ctx: &NodeContext) -> fmt::Result {
        let var = ctx.position_var();
        let b = &mut self.body;
        writeln!(b, "local {var} = {{")?;
        writeln!(b, "    Identifier = {},", lua_string(&var))?;
        writeln!(b, "    Parent = earthTransforms.EarthCenter.Identifier,")?;
        writeln!(b, "    GUI = {{")?;
        writeln!(b, "        Name = {},", lua_string(&var))?;
        writeln!(b, "        Path = {},", lua_string(&ctx.gui_path))?;
        writeln!(b, "        Hidden = true")?;
        writeln!(b, "    }}")?;
        writeln!(b, "}}")?;
        writeln!(b)?;
        self.nodes.push(var);
        Ok(())
    }

    fn action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Fade each target out on approach and back in on exit.
    fn fade_action(&mut self, ctx: &NodeContext) {
        if ctx.fade_targets.is_empty() {
            return;
        }
        let mut commands = vec!["if args.Transition == \"Approaching\" then".to_string()];
        for target in &ctx.fade_targets {
            commands.push(format!(
                "  openspace.setPropertyValueSingle(\"Scene.{target}.Renderable.Fade\", 0.0, 1.0)"
            ));
        }
        commands.push("elseif args.Transition == \"Exiting\" then".to_string());
        for target in &ctx.fade_targets {
            commands.push(format!(
                "  openspace.setPropertyValueSingle(\"Scene.{target}.Renderable.Fade\", 1.0, 1.0)"
            ));
        }
        commands.push("end".to_string());

        self.action(Action {
            var: ctx.fade_var(),
            name: ctx.fade_var(),
            commands,
            documentation: format!("Fade related datasets around {}", ctx.identifier),
            gui_path: ctx.gui_path.clone(),
            is_local: true,
        });
    }

    /// Start a renderable node; the caller writes the `Renderable` table body.
    fn open_node(&mut self, var: &str, parent: &str) -> fmt::Result {
        let b = &mut self.body;
        writeln!(b, "local {var} = {{")?;
        writeln!(b, "    Identifier = {},", lua_string(var))?;
        writeln!(b, "    Parent = {parent}.Identifier,")?;
        self.nodes.push(var.to_string());
        Ok(())
    }

    /// Interaction settings, with the fade action bound to all transitions.
    fn interaction(&mut self, ctx: &NodeContext, sphere: f64) -> fmt::Result {
        let unit = ctx.unit_var();
        let b = &mut self.body;
        writeln!(b, "    InteractionSphere = {sphere} * {unit},")?;
        writeln!(b, "    ApproachFactor = {APPROACH_FACTOR:?},")?;
        writeln!(b, "    ReachFactor = {REACH_FACTOR:?},")?;
        if !ctx.fade_targets.is_empty() {
            let fade = lua_string(&ctx.fade_var());
            for hook in ["OnApproach", "OnReach", "OnRecede", "OnExit"] {
                writeln!(b, "    {hook} = {{ {fade} }},")?;
            }
        }
        Ok(())
    }

    fn gui(&mut self, name: &str, path: &str, description: Option<&str>, hidden: bool) -> fmt::Result {
        let mut fields = vec![
            format!("Name = {}", lua_string(name)),
            format!("Path = {}", lua_string(path)),
        ];
        if let Some(description) = description {
            fields.push(format!("Description = {}", lua_string(description)));
        }
        if hidden {
            fields.push("Hidden = true".to_string());
        }
        let b = &mut self.body;
        writeln!(b, "    GUI = {{")?;
        writeln!(b, "        {}", fields.join(",\n        "))?;
        writeln!(b, "    }}")?;
        writeln!(b, "}}")?;
        writeln!(b)
    }

    fn raw(&mut self, text: &str) {
        self.body.push_str(text);
    }

    fn finish(self) -> Result<String, fmt::Error> {
        let mut out = self.header;

        for action in &self.actions {
            writeln!(out, "local {} = {{", action.var)?;
            writeln!(out, "    Identifier = {},", lua_string(&action.var))?;
            writeln!(out, "    Name = {},", lua_string(&action.name))?;
            writeln!(out, "    Command = [[")?;
            for command in &action.commands {
                writeln!(out, "      {command}")?;
            }
            writeln!(out, "    ]],")?;
            writeln!(out, "    Documentation = {},", lua_string(&action.documentation))?;
            writeln!(out, "    GuiPath = {},", lua_string(&action.gui_path))?;
            writeln!(out, "    IsLocal = {}", action.is_local)?;
            writeln!(out, "}}")?;
            writeln!(out)?;
        }

        out.push_str(&self.body);

        writeln!(out, "asset.onInitialize(function()")?;
        for action in &self.actions {
            writeln!(out, "  openspace.action.registerAction({})", action.var)?;
        }
        for node in &self.nodes {
            writeln!(out, "  openspace.addSceneGraphNode({node})")?;
        }
        writeln!(out, "end)")?;
        writeln!(out)?;

        writeln!(out, "asset.onDeinitialize(function()")?;
        for node in self.nodes.iter().rev() {
            writeln!(out, "  openspace.removeSceneGraphNode({node})")?;
        }
        for action in self.actions.iter().rev() {
            writeln!(out, "  openspace.action.removeAction({})", action.var)?;
        }
        writeln!(out, "end)")?;
        writeln!(out)?;

        for node in &self.nodes {
            writeln!(out, "asset.export({node})")?;
        }
        Ok(out)
    }
}

/// Color-map binding for a points descriptor.
#[derive(Debug, Clone)]
pub struct ColorMapping {
    pub file: String,
    /// Highest index in the color map.
    pub max_index: usize,
}

pub fn points_asset(
    ctx: &NodeContext,
    fields: &PointsFields,
    data_file: &str,
    colors: Option<&ColorMapping>,
) -> Result<String, fmt::Error> {
    let mut asset = LuaAsset::new(ctx)?;
    asset.fade_action(ctx);
    asset.open_node(&ctx.identifier, &ctx.position_var())?;

    let mut r = String::new();
    writeln!(r, "    Renderable = {{")?;
    writeln!(r, "        Type = \"RenderablePointCloud\",")?;
    writeln!(r, "        File = asset.resource({}),", lua_string(data_file))?;
    writeln!(r, "        Unit = {},", lua_string(ctx.units.as_str()))?;
    if let Some(texture) = &fields.default_texture {
        // Textures are deployed flat, next to the descriptor.
        writeln!(
            r,
            "        Texture = {{ File = asset.resource({}) }},",
            lua_string(&deployed_name(texture))
        )?;
    }
    let max_size = fields
        .max_size
        .map(|m| format!(", MaxSize = {m}, EnableMaxSizeControl = true"))
        .unwrap_or_default();
    writeln!(
        r,
        "        SizeSettings = {{ ScaleExponent = {}, ScaleFactor = {}{max_size} }},",
        fields.point_scale_exponent, fields.point_scale_factor
    )?;
    match colors {
        Some(mapping) => {
            writeln!(r, "        Coloring = {{")?;
            writeln!(r, "            ColorMapping = {{")?;
            writeln!(r, "                File = asset.resource({}),", lua_string(&mapping.file))?;
            writeln!(r, "                Parameter = \"color\",")?;
            writeln!(r, "                ValueRange = {{ 0, {} }}", mapping.max_index)?;
            writeln!(r, "            }}")?;
            writeln!(r, "        }}")?;
        }
        None => {
            writeln!(r, "        Coloring = {{ FixedColor = {{ 0.8, 0.8, 0.8 }} }}")?;
        }
    }
    writeln!(r, "    }},")?;
    asset.raw(&r);

    asset.interaction(ctx, fields.interaction_sphere)?;
    asset.gui(&ctx.gui_name, &ctx.gui_path, ctx.description.as_deref(), ctx.hidden)?;
    asset.finish()
}

/// Labels and group labels share the same renderable.
pub fn labels_asset(
    ctx: &NodeContext,
    fields: &LabelsFields,
    label_file: &str,
) -> Result<String, fmt::Error> {
    let mut asset = LuaAsset::new(ctx)?;
    asset.fade_action(ctx);
    asset.open_node(&ctx.identifier, &ctx.position_var())?;

    let mut r = String::new();
    writeln!(r, "    Renderable = {{")?;
    writeln!(r, "        Type = \"RenderablePointCloud\",")?;
    writeln!(r, "        Labels = {{")?;
    writeln!(r, "            File = asset.resource({}),", lua_string(label_file))?;
    writeln!(r, "            Unit = {},", lua_string(ctx.units.as_str()))?;
    writeln!(r, "            FaceCamera = true,")?;
    writeln!(r, "            Enabled = true,")?;
    writeln!(r, "            Size = {},", fields.label_size)?;
    writeln!(
        r,
        "            MinMaxSize = {{ {}, {} }}",
        fields.label_minsize, fields.label_maxsize
    )?;
    writeln!(r, "        }}")?;
    writeln!(r, "    }},")?;
    asset.raw(&r);

    if !ctx.fade_targets.is_empty() {
        asset.interaction(ctx, constants::render_settings::INTERACTION_SPHERE)?;
    }
    asset.gui(&ctx.gui_name, &ctx.gui_path, ctx.description.as_deref(), ctx.hidden)?;
    asset.finish()
}

#[derive(Debug, Clone)]
pub struct LineStyle {
    pub width: f64,
    pub opacity: f64,
    /// Line colors; mesh `-c` indices are 1-based into this list.
    pub colors: Vec<Rgba>,
}

pub fn branches_asset(
    ctx: &NodeContext,
    style: &LineStyle,
    speck_file: &str,
    names_file: &str,
) -> Result<String, fmt::Error> {
    let mut asset = LuaAsset::new(ctx)?;
    asset.fade_action(ctx);
    asset.open_node(&ctx.identifier, &ctx.position_var())?;

    let colors: Vec<String> = style
        .colors
        .iter()
        .map(|c| format!("{{ {:.6}, {:.6}, {:.6} }}", c.r, c.g, c.b))
        .collect();

    let mut r = String::new();
    writeln!(r, "    Renderable = {{")?;
    writeln!(r, "        Type = \"RenderableConstellationLines\",")?;
    writeln!(r, "        Colors = {{ {} }},", colors.join(", "))?;
    writeln!(r, "        Opacity = {},", style.opacity)?;
    writeln!(r, "        File = asset.resource({}),", lua_string(speck_file))?;
    writeln!(r, "        NamesFile = asset.resource({}),", lua_string(names_file))?;
    writeln!(r, "        LineWidth = {},", style.width)?;
    writeln!(r, "        Unit = {}", lua_string(ctx.units.as_str()))?;
    writeln!(r, "    }},")?;
    asset.raw(&r);

    if !ctx.fade_targets.is_empty() {
        asset.interaction(ctx, constants::render_settings::INTERACTION_SPHERE)?;
    }
    asset.gui(&ctx.gui_name, &ctx.gui_path, ctx.description.as_deref(), ctx.hidden)?;
    asset.finish()
}

/// Where a model's geometry comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Downloaded by the host on first load.
    Url { url: String, file_name: String },
    /// Shipped next to the descriptor.
    Local { file_name: String },
}

/// One placed model or molecule, anchored to a row of the entry's dataset.
#[derive(Debug, Clone)]
pub struct PlacedNode {
    pub identifier: String,
    pub name: String,
    pub position: [f64; 3],
    pub scale: f64,
    pub enabled: bool,
    pub geometry: Geometry,
    pub gui_path: String,
    pub description: String,
}

fn geometry_expression(asset: &mut LuaAsset, node: &PlacedNode) -> Result<String, fmt::Error> {
    match &node.geometry {
        Geometry::Local { file_name } => Ok(format!("asset.resource({})", lua_string(file_name))),
        Geometry::Url { url, file_name } => {
            let sync = format!("syncData_{}", node.identifier);
            let mut s = String::new();
            writeln!(s, "local {sync} = asset.resource({{")?;
            writeln!(s, "    Name = {},", lua_string(&node.identifier))?;
            writeln!(s, "    Type = \"UrlSynchronization\",")?;
            writeln!(s, "    Identifier = {},", lua_string(&node.identifier))?;
            writeln!(s, "    Url = {},", lua_string(&url.replace(' ', "%20")))?;
            writeln!(s, "    Filename = {}", lua_string(file_name))?;
            writeln!(s, "}})")?;
            writeln!(s)?;
            asset.raw(&s);
            Ok(format!("{sync} .. {}", lua_string(file_name)))
        }
    }
}

fn translation(ctx: &NodeContext, p: [f64; 3]) -> String {
    let unit = ctx.unit_var();
    format!(
        "    Transform = {{\n        Translation = {{\n            Type = \"StaticTranslation\",\n            Position = {{ {} * {unit}, {} * {unit}, {} * {unit} }}\n        }}\n    }},\n",
        p[0], p[1], p[2]
    )
}

fn toggle_action(node: &PlacedNode, on: bool) -> Action {
    let state = if on { "on" } else { "off" };
    Action {
        var: format!("{}_{state}", node.identifier),
        name: format!("{} {state}", node.name),
        commands: vec![format!(
            "openspace.setPropertyValueSingle(\"Scene.{}.Renderable.Enabled\", {on})",
            node.identifier
        )],
        documentation: format!("Turn {state} {}", node.name),
        gui_path: node.gui_path.clone(),
        is_local: false,
    }
}

fn all_toggle_action(ctx: &NodeContext, nodes: &[PlacedNode], on: bool) -> Action {
    let state = if on { "on" } else { "off" };
    Action {
        var: format!("{}_all_{state}", ctx.identifier),
        name: format!("All {} {state}", ctx.gui_name),
        commands: nodes
            .iter()
            .map(|n| {
                format!(
                    "openspace.setPropertyValueSingle(\"Scene.{}.Renderable.Enabled\", {on})",
                    n.identifier
                )
            })
            .collect(),
        documentation: format!("Turn all of {} {state}", ctx.gui_name),
        gui_path: ctx.gui_path.clone(),
        is_local: false,
    }
}

/// 3-D models placed at matching rows, with per-model and all-model toggles.
pub fn models_asset(ctx: &NodeContext, nodes: &[PlacedNode]) -> Result<String, fmt::Error> {
    let mut asset = LuaAsset::new(ctx)?;
    for node in nodes {
        asset.action(toggle_action(node, true));
        asset.action(toggle_action(node, false));
    }
    asset.action(all_toggle_action(ctx, nodes, true));
    asset.action(all_toggle_action(ctx, nodes, false));

    for node in nodes {
        let geometry = geometry_expression(&mut asset, node)?;
        asset.open_node(&node.identifier, &ctx.position_var())?;
        let mut r = translation(ctx, node.position);
        writeln!(r, "    Renderable = {{")?;
        writeln!(r, "        UseCaching = false,")?;
        writeln!(r, "        Type = \"RenderableModel\",")?;
        writeln!(r, "        Coloring = {{ FixedColor = {{ 0.8, 0.8, 0.8 }} }},")?;
        writeln!(r, "        AmbientIntensity = 0.0,")?;
        writeln!(r, "        Opacity = 1.0,")?;
        writeln!(r, "        GeometryFile = {geometry},")?;
        writeln!(r, "        ModelScale = {},", node.scale)?;
        writeln!(r, "        Enabled = {},", node.enabled)?;
        writeln!(r, "        LightSources = {{")?;
        writeln!(
            r,
            "            {{ Identifier = \"Camera\", Type = \"CameraLightSource\", Intensity = 0.3 }}"
        )?;
        writeln!(r, "        }}")?;
        writeln!(r, "    }},")?;
        asset.raw(&r);
        asset.gui(&node.name, &node.gui_path, Some(node.description.as_str()), false)?;
    }
    asset.finish()
}

/// Molecular structures placed at matching rows.
pub fn pdb_asset(ctx: &NodeContext, nodes: &[PlacedNode]) -> Result<String, fmt::Error> {
    let mut asset = LuaAsset::new(ctx)?;
    for node in nodes {
        asset.action(toggle_action(node, true));
        asset.action(toggle_action(node, false));
    }

    for node in nodes {
        let geometry = geometry_expression(&mut asset, node)?;
        asset.open_node(&node.identifier, &ctx.position_var())?;
        let mut r = translation(ctx, node.position);
        writeln!(r, "    Renderable = {{")?;
        writeln!(r, "        Type = \"RenderableMolecule\",")?;
        writeln!(r, "        MoleculeFiles = {{ {geometry} }},")?;
        writeln!(r, "        RepresentationType = \"Cartoon\",")?;
        writeln!(r, "        Scale = {},", node.scale)?;
        writeln!(r, "        Enabled = {}", node.enabled)?;
        writeln!(r, "    }},")?;
        asset.raw(&r);
        asset.gui(&node.name, &node.gui_path, Some(node.description.as_str()), false)?;
    }
    asset.finish()
}

/// Top-level asset requiring every generated descriptor of a run.
pub fn scene_asset(dataset_name: &str, identifiers: &[String]) -> Result<String, fmt::Error> {
    let mut out = String::new();
    writeln!(out, "-- {dataset_name}: every dataset of the run")?;
    for id in identifiers {
        writeln!(out, "asset.require(\"./{id}\")")?;
    }
    writeln!(out)?;
    writeln!(out, "asset.meta = {{")?;
    writeln!(out, "    Name = {},", lua_string(dataset_name))?;
    writeln!(out, "    Description = {}", lua_string(&format!("{} datasets", identifiers.len())))?;
    writeln!(out, "}}")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use constants::render_settings::{
        INTERACTION_SPHERE, POINT_SCALE_EXPONENT, POINT_SCALE_FACTOR, TEXT_MAX_SIZE,
        TEXT_MIN_SIZE, TEXT_SIZE,
    };

    fn ctx(fade: &[&str]) -> NodeContext {
        NodeContext {
            identifier: "species_points".into(),
            dataset_name: "Tree".into(),
            source_name: "species.csv".into(),
            gui_name: "Species".into(),
            gui_path: "/Tree/Points".into(),
            hidden: false,
            units: Units::Km,
            description: Some("Anchored to classes_points at class = Mammalia".into()),
            fade_targets: fade.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn points_fields() -> PointsFields {
        PointsFields {
            default_texture: Some("point3A.png".into()),
            point_scale_factor: POINT_SCALE_FACTOR,
            point_scale_exponent: POINT_SCALE_EXPONENT,
            max_size: None,
            interaction_sphere: INTERACTION_SPHERE,
        }
    }

    #[test]
    fn test_lua_string_escapes() {
        assert_eq!(lua_string(r#"a "b" \c"#), r#""a \"b\" \\c""#);
        assert_eq!(lua_string("x\ny"), "\"x\\ny\"");
    }

    #[test]
    fn test_points_descriptor() {
        let mapping = ColorMapping {
            file: "species_points.cmap".into(),
            max_index: 3,
        };
        let lua = points_asset(&ctx(&[]), &points_fields(), "species_points.csv", Some(&mapping)).unwrap();

        assert!(lua.contains("local meters_in_Km = 1000\n"));
        assert!(lua.contains("Type = \"RenderablePointCloud\""));
        assert!(lua.contains("File = asset.resource(\"species_points.csv\")"));
        assert!(lua.contains("Texture = { File = asset.resource(\"point3A.png\") }"));
        assert!(lua.contains("ValueRange = { 0, 3 }"));
        assert!(lua.contains("InteractionSphere = 1 * meters_in_Km"));
        assert!(lua.contains("Description = \"Anchored to classes_points at class = Mammalia\""));
        assert!(!lua.contains("OnApproach"));
        assert!(lua.contains("openspace.addSceneGraphNode(species_points_position)\n  openspace.addSceneGraphNode(species_points)"));
        assert!(lua.contains("openspace.removeSceneGraphNode(species_points)\n  openspace.removeSceneGraphNode(species_points_position)"));
        assert!(lua.ends_with("asset.export(species_points_position)\nasset.export(species_points)\n"));
    }

    #[test]
    fn test_nested_texture_referenced_by_file_name() {
        let fields = PointsFields {
            default_texture: Some("textures/sub/point3A.png".into()),
            ..points_fields()
        };
        let lua = points_asset(&ctx(&[]), &fields, "species_points.csv", None).unwrap();

        assert!(lua.contains("Texture = { File = asset.resource(\"point3A.png\") }"));
        assert!(!lua.contains("textures/sub"));
    }

    #[test]
    fn test_fade_action_bound_to_transitions() {
        let lua = points_asset(
            &ctx(&["classes_points", "classes_class_labels"]),
            &points_fields(),
            "species_points.csv",
            None,
        )
        .unwrap();

        assert!(lua.contains("local species_points_fade = {"));
        assert!(lua.contains(
            "openspace.setPropertyValueSingle(\"Scene.classes_points.Renderable.Fade\", 0.0, 1.0)"
        ));
        assert!(lua.contains(
            "openspace.setPropertyValueSingle(\"Scene.classes_class_labels.Renderable.Fade\", 1.0, 1.0)"
        ));
        for hook in ["OnApproach", "OnReach", "OnRecede", "OnExit"] {
            assert!(lua.contains(&format!("{hook} = {{ \"species_points_fade\" }}")));
        }
        assert!(lua.contains("openspace.action.registerAction(species_points_fade)"));
        assert!(lua.contains("openspace.action.removeAction(species_points_fade)"));
        assert!(lua.contains("FixedColor"));
    }

    #[test]
    fn test_labels_descriptor() {
        let fields = LabelsFields {
            label_column: "class".into(),
            label_size: TEXT_SIZE,
            label_minsize: TEXT_MIN_SIZE,
            label_maxsize: TEXT_MAX_SIZE,
            on_sphere: true,
        };
        let lua = labels_asset(&ctx(&[]), &fields, "species_class.label").unwrap();
        assert!(lua.contains("File = asset.resource(\"species_class.label\")"));
        assert!(lua.contains("MinMaxSize = { 15, 30 }"));
        assert!(lua.contains("Size = 2.75"));
    }

    #[test]
    fn test_branches_descriptor() {
        let style = LineStyle {
            width: 1.0,
            opacity: 0.7,
            colors: vec![Rgba::gray(0.4), Rgba::new(1.0, 0.0, 0.0, 1.0).unwrap()],
        };
        let lua = branches_asset(&ctx(&[]), &style, "tree_branches.speck", "tree_branches.dat").unwrap();
        assert!(lua.contains("Type = \"RenderableConstellationLines\""));
        assert!(lua.contains(
            "Colors = { { 0.400000, 0.400000, 0.400000 }, { 1.000000, 0.000000, 0.000000 } }"
        ));
        assert!(lua.contains("NamesFile = asset.resource(\"tree_branches.dat\")"));
        assert!(lua.contains("LineWidth = 1,"));
    }

    #[test]
    fn test_models_descriptor_with_actions() {
        let nodes = vec![
            PlacedNode {
                identifier: "zoo_Aves_bird".into(),
                name: "Bird".into(),
                position: [1.5, 0.0, -2.0],
                scale: 10.0,
                enabled: false,
                geometry: Geometry::Url {
                    url: "https://example.org/models/blue bird.glb".into(),
                    file_name: "blue_bird.glb".into(),
                },
                gui_path: "/Tree/Models/Aves".into(),
                description: "Anchored to row sp1 (class = Aves)".into(),
            },
            PlacedNode {
                identifier: "zoo_Mammalia_wolf".into(),
                name: "Wolf".into(),
                position: [0.0, 1.0, 0.0],
                scale: 1.0,
                enabled: true,
                geometry: Geometry::Local {
                    file_name: "wolf.glb".into(),
                },
                gui_path: "/Tree/Models/Mammalia".into(),
                description: "Anchored to row sp2 (class = Mammalia)".into(),
            },
        ];
        let lua = models_asset(&ctx(&[]), &nodes).unwrap();

        assert!(lua.contains("Url = \"https://example.org/models/blue%20bird.glb\""));
        assert!(lua.contains("GeometryFile = syncData_zoo_Aves_bird .. \"blue_bird.glb\""));
        assert!(lua.contains("GeometryFile = asset.resource(\"wolf.glb\")"));
        assert!(lua.contains("Position = { 1.5 * meters_in_Km, 0 * meters_in_Km, -2 * meters_in_Km }"));
        assert!(lua.contains("Parent = species_points_position.Identifier"));
        assert!(lua.contains("local zoo_Aves_bird_on = {"));
        assert!(lua.contains("\"Scene.zoo_Mammalia_wolf.Renderable.Enabled\", false"));
        assert!(lua.contains("local species_points_all_on = {"));
        assert!(lua.contains("Enabled = false,"));
    }

    #[test]
    fn test_scene_asset_requires_all() {
        let lua = scene_asset("Tree", &["a_points".to_string(), "b_branches".to_string()]).unwrap();
        assert!(lua.contains("asset.require(\"./a_points\")\nasset.require(\"./b_branches\")\n"));
    }
}
