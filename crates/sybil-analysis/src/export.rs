//! GraphML export of the transfer graph, for inspection in Gephi or
//! networkx. Diagnostic only; nothing reads these files back.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use eyre::{Context, Result};

use crate::transfer_graph::TransferGraph;

/// Write `graph` as GraphML.
///
/// Nodes carry their community label (or -1 when unassigned); edges carry
/// cumulative weight, variance and observation count.
pub fn write_graphml<W: Write>(graph: &TransferGraph, mut out: W) -> Result<()> {
    writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
    writeln!(out, "<graphml xmlns=\"http://graphml.graphdrawing.org/xmlns\">")?;
    writeln!(
        out,
        "  <key id=\"community\" for=\"node\" attr.name=\"community\" attr.type=\"long\"/>"
    )?;
    writeln!(
        out,
        "  <key id=\"weight\" for=\"edge\" attr.name=\"weight\" attr.type=\"double\"/>"
    )?;
    writeln!(
        out,
        "  <key id=\"variance\" for=\"edge\" attr.name=\"variance\" attr.type=\"double\"/>"
    )?;
    writeln!(
        out,
        "  <key id=\"count\" for=\"edge\" attr.name=\"count\" attr.type=\"long\"/>"
    )?;
    writeln!(out, "  <graph id=\"G\" edgedefault=\"directed\">")?;

    for account in graph.accounts() {
        let community = account.community.map_or(-1, |c| c as i64);
        writeln!(
            out,
            "    <node id=\"{}\">\n      <data key=\"community\">{}</data>\n    </node>",
            escape(&account.address),
            community
        )?;
    }

    for (edge_id, (from, to, edge)) in graph.edges().enumerate() {
        writeln!(
            out,
            "    <edge id=\"e{}\" source=\"{}\" target=\"{}\">",
            edge_id,
            escape(from),
            escape(to)
        )?;
        writeln!(out, "      <data key=\"weight\">{}</data>", edge.weight)?;
        writeln!(out, "      <data key=\"variance\">{}</data>", edge.variance())?;
        writeln!(out, "      <data key=\"count\">{}</data>", edge.count)?;
        writeln!(out, "    </edge>")?;
    }

    writeln!(out, "  </graph>")?;
    writeln!(out, "</graphml>")?;
    Ok(())
}

/// Write `graph` as GraphML to `path`, replacing any existing file.
pub fn export_graphml_file(graph: &TransferGraph, path: &Path) -> Result<()> {
    let file = File::create(path)
        .wrap_err_with(|| format!("failed to create graph export {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_graphml(graph, &mut writer)?;
    writer.flush()?;
    tracing::debug!(
        path = %path.display(),
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "graph exported"
    );
    Ok(())
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
