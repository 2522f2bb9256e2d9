// Tue Jan 13 2026 - Alex

use crate::analysis::cfg::{BasicBlock, BlockKind, ControlFlowGraph, EdgeKind};
use crate::symbol::SymbolResolver;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};

/// Graphviz rendering of a [`ControlFlowGraph`].
pub struct DotExporter<'a> {
    cfg: &'a ControlFlowGraph,
    resolver: Option<&'a SymbolResolver>,
    show_instructions: bool,
}

impl<'a> DotExporter<'a> {
    pub fn new(cfg: &'a ControlFlowGraph) -> Self {
        Self { cfg, resolver: None, show_instructions: false }
    }

    /// Names call targets instead of printing raw addresses.
    pub fn with_resolver(mut self, resolver: &'a SymbolResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_instructions(mut self, show: bool) -> Self {
        self.show_instructions = show;
        self
    }

    pub fn to_dot(&self) -> String {
        let mut dot = String::new();
        let title = escape(&self.cfg.function_name);

        writeln!(dot, "digraph \"{}\" {{", title).ok();
        writeln!(dot, "  label=\"{}\";", title).ok();
        writeln!(dot, "  rankdir=TB;").ok();
        writeln!(dot, "  node [shape=box, style=filled, fontname=\"Courier\"];").ok();
        writeln!(dot, "  edge [arrowsize=0.8];").ok();
        writeln!(dot).ok();

        for block in self.cfg.blocks() {
            writeln!(
                dot,
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];",
                node_id(block.start),
                self.block_label(block),
                self.fill_color(block)
            )
            .ok();
        }

        let callees: BTreeSet<u64> =
            self.cfg.edges().iter().filter(|e| e.kind == EdgeKind::Call).map(|e| e.to).collect();
        for callee in &callees {
            writeln!(
                dot,
                "  \"call_{:x}\" [label=\"{}\", shape=ellipse, fillcolor=\"white\"];",
                callee,
                escape(&self.callee_name(*callee))
            )
            .ok();
        }

        writeln!(dot).ok();
        for edge in self.cfg.edges() {
            let from = node_id(edge.from);
            let line = match edge.kind {
                EdgeKind::Fallthrough => format!("\"{}\" -> \"{}\" [color=green]", from, node_id(edge.to)),
                EdgeKind::ConditionalTrue => {
                    format!("\"{}\" -> \"{}\" [label=\"T\", color=red]", from, node_id(edge.to))
                }
                EdgeKind::ConditionalFalse => {
                    format!("\"{}\" -> \"{}\" [label=\"F\", color=red]", from, node_id(edge.to))
                }
                EdgeKind::Unconditional => {
                    format!("\"{}\" -> \"{}\" [color=red, style=bold]", from, node_id(edge.to))
                }
                EdgeKind::Call => {
                    format!("\"{}\" -> \"call_{:x}\" [label=\"call\", color=blue, style=dashed]", from, edge.to)
                }
            };
            writeln!(dot, "  {};", line).ok();
        }

        dot.push_str("}\n");
        dot
    }

    fn block_label(&self, block: &BasicBlock) -> String {
        let mut label = format!("0x{:x} - 0x{:x}\\l{} instructions\\l", block.start, block.end, block.len());
        if block.is_loop_header {
            label.push_str("loop header\\l");
        }
        if self.show_instructions {
            for instr in &block.instructions {
                label.push_str(&escape(&format!("{:x}: {}", instr.address, instr.text())));
                label.push_str("\\l");
            }
        }
        label
    }

    fn fill_color(&self, block: &BasicBlock) -> &'static str {
        if block.start == self.cfg.start {
            return "lightblue";
        }
        match block.kind {
            BlockKind::Return => "lightcoral",
            BlockKind::Conditional => "lightyellow",
            _ => "lightgray",
        }
    }

    fn callee_name(&self, addr: u64) -> String {
        match self.resolver {
            Some(resolver) => resolver.format_address(addr),
            None => format!("sub_{:x}", addr),
        }
    }

    pub fn write_dot(&self, path: impl AsRef<Path>) -> io::Result<()> {
        std::fs::write(path.as_ref(), self.to_dot())?;
        log::debug!("Wrote CFG for {} to {}", self.cfg.function_name, path.as_ref().display());
        Ok(())
    }

    /// Pipes the graph through Graphviz `dot -Tpng`.
    pub fn render_png(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut child = Command::new("dot")
            .arg("-Tpng")
            .arg("-o")
            .arg(path.as_ref())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(self.to_dot().as_bytes())?;
        }
        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(io::Error::new(io::ErrorKind::Other, format!("graphviz failed: {}", stderr.trim())));
        }
        Ok(())
    }
}

fn node_id(addr: u64) -> String {
    format!("block_{:x}", addr)
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::arm64::decode_all;
    use crate::analysis::cfg::CfgBuilder;
    use crate::container::testing::words_to_bytes;

    const BASE: u64 = 0x1_0000_4000;

    fn graph() -> ControlFlowGraph {
        let words = [
            0xb4000060, // cbz x0, 0xc
            0x94000040, // bl
            0x14000001, // b 0xc
            0xd65f03c0, // ret
        ];
        CfgBuilder::build("demo", &decode_all(&words_to_bytes(&words), BASE))
    }

    #[test]
    fn test_dot_nodes_and_styled_edges() {
        let cfg = graph();
        let dot = DotExporter::new(&cfg).to_dot();

        assert!(dot.starts_with("digraph \"demo\" {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains(&format!("\"block_{:x}\"", BASE)));
        assert!(dot.contains("fillcolor=\"lightblue\""));
        assert!(dot.contains("fillcolor=\"lightcoral\""));
        assert!(dot.contains("[label=\"T\", color=red]"));
        assert!(dot.contains("[label=\"F\", color=red]"));
        assert!(dot.contains("color=red, style=bold"));
        assert!(dot.contains(&format!("\"call_{:x}\"", BASE + 4 + 0x100)));
        assert!(dot.contains("style=dashed"));
        assert!(dot.contains("2 instructions"));
    }

    #[test]
    fn test_instruction_listing_is_optional() {
        let cfg = graph();
        assert!(!DotExporter::new(&cfg).to_dot().contains("ret"));
        assert!(DotExporter::new(&cfg).with_instructions(true).to_dot().contains("ret"));
    }

    #[test]
    fn test_write_dot_file() {
        let cfg = graph();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.dot");
        DotExporter::new(&cfg).write_dot(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("digraph"));
    }
}
