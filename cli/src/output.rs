//! Formatting helpers for CLI output.

use std::fmt::Write;

use a3s_pack_runtime::BuilderInfo;
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Render one view of a builder.
///
/// `configured_mirrors` are the operator's mirrors for the builder's run
/// image; they are listed ahead of the mirrors baked into the builder.
pub fn render_builder_info(info: &BuilderInfo, configured_mirrors: &[String]) -> String {
    let mut out = String::new();

    let description = if info.description.is_empty() {
        "(none)"
    } else {
        info.description.as_str()
    };
    let _ = writeln!(out, "Description: {description}");
    let _ = writeln!(out);

    if !info.created_by.name.is_empty() {
        let _ = writeln!(out, "Created By:");
        let _ = writeln!(out, "  Name: {}", info.created_by.name);
        let _ = writeln!(out, "  Version: {}", info.created_by.version);
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "Stack: {}", info.stack);
    if !info.mixins.is_empty() {
        let _ = writeln!(out, "Mixins: {}", info.mixins.join(", "));
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Lifecycle:");
    let _ = writeln!(out, "  Version: {}", or_unknown(&info.lifecycle.version));
    let _ = writeln!(out, "  Platform API: {}", or_unknown(&info.lifecycle.api.platform));
    let _ = writeln!(out, "  Buildpack API: {}", or_unknown(&info.lifecycle.api.buildpack));
    let _ = writeln!(out);

    let _ = writeln!(out, "Run Images:");
    if configured_mirrors.is_empty() && info.run_image.is_empty() && info.run_image_mirrors.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for mirror in configured_mirrors {
        let _ = writeln!(out, "  {mirror} (user-configured)");
    }
    if !info.run_image.is_empty() {
        let _ = writeln!(out, "  {}", info.run_image);
    }
    for mirror in &info.run_image_mirrors {
        let _ = writeln!(out, "  {mirror}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Buildpacks:");
    if info.buildpacks.is_empty() {
        let _ = writeln!(out, "  (none)");
    } else {
        let mut table = new_table(&["ID", "VERSION", "LATEST"]);
        for bp in &info.buildpacks {
            table.add_row(vec![bp.id.clone(), bp.version.clone(), bp.latest.to_string()]);
        }
        let _ = writeln!(out, "{table}");
    }
    let _ = writeln!(out);

    let _ = writeln!(out, "Detection Order:");
    if info.groups.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (index, group) in info.groups.iter().enumerate() {
        let _ = writeln!(out, "  Group #{}:", index + 1);
        for bp in &group.buildpacks {
            let optional = if bp.optional { " (optional)" } else { "" };
            let _ = writeln!(out, "    {}@{}{}", bp.id, bp.version, optional);
        }
    }

    out
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() {
        "(unknown)"
    } else {
        value
    }
}
