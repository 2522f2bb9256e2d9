// Tue Jan 13 2026 - Alex

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use machscope::analysis::disasm::QuickString;
use machscope::analysis::{AnalysisContext, DetectedFunction};
use machscope::session::{AnalysisSession, SessionSummary};
use machscope::utils::logging;
use machscope::xref::CrossReference;
use machscope::{Config, DotExporter};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author = "Alex")]
#[command(version = "0.1.0")]
#[command(about = "Static analysis and pseudo-code for arm64 Mach-O binaries", long_about = None)]
struct Args {
    binary: PathBuf,

    /// Load address override (hex with 0x, or decimal)
    #[arg(long, value_parser = parse_address)]
    base: Option<u64>,

    #[arg(short, long, value_parser = parse_address, conflicts_with = "name")]
    function: Option<u64>,

    #[arg(short, long)]
    name: Option<String>,

    /// Write the selected function's CFG as Graphviz DOT
    #[arg(long)]
    cfg: Option<PathBuf>,

    /// Render the selected function's CFG to PNG (needs Graphviz)
    #[arg(long)]
    png: Option<PathBuf>,

    #[arg(long)]
    pseudo: bool,

    #[arg(long)]
    disasm: bool,

    #[arg(long, value_parser = parse_address)]
    xrefs: Option<u64>,

    #[arg(long)]
    classes: bool,

    #[arg(long)]
    strings: bool,

    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long)]
    no_progress: bool,

    #[arg(long)]
    json: bool,
}

fn parse_address(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => text.parse::<u64>(),
    };
    parsed.map_err(|e| format!("invalid address '{}': {}", text, e))
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'a DetectedFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disassembly: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pseudo_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xrefs_to: Option<Vec<&'a CrossReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    xrefs_from: Option<Vec<&'a CrossReference>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    strings: Option<Vec<QuickString>>,
}

fn main() {
    let args = Args::parse();
    logging::init_logger(args.verbose);

    if let Err(e) = run(args) {
        eprintln!("{} {:#}", "[!]".red(), e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).map_err(anyhow::Error::msg)?,
        None => Config::default(),
    };
    if let Some(base) = args.base {
        config = config.with_base_address(base);
    }
    config.validate().map_err(anyhow::Error::msg).context("Invalid configuration")?;
    Ok(config)
}

fn progress_bar(args: &Args) -> Option<ProgressBar> {
    if args.no_progress || args.json {
        return None;
    }
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message("Analyzing functions...");
    Some(pb)
}

fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();
    let config = load_config(&args)?;

    if !args.json {
        println!("{}", "machscope".cyan().bold());
        println!("{}", "=".repeat(50).cyan());
        println!("{} Loading binary: {}", "[*]".blue(), args.binary.display());
    }

    let mut session = AnalysisSession::open(&args.binary, config)
        .with_context(|| format!("Failed to load {}", args.binary.display()))?;

    if !args.json {
        let summary = session.container().summary();
        println!(
            "{} Loaded {} segments, {} sections, {} symbols (slide {:#x})",
            "[+]".green(),
            summary.segments,
            summary.sections,
            summary.symbols,
            summary.slide
        );
    }

    let pb = progress_bar(&args);
    let mut ctx = AnalysisContext::new();
    if let Some(pb) = pb.clone() {
        ctx = ctx.with_progress(move |done, total| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        });
    }
    let analysis = session.analyze(&ctx).context("Function analysis failed")?;
    let (function_count, xref_count) = (analysis.functions.len(), analysis.xrefs.len());
    if let Some(pb) = &pb {
        pb.finish_with_message("Complete!");
    }

    let selected = match (args.function, &args.name) {
        (Some(addr), _) => Some(
            session
                .function_at(addr)
                .with_context(|| format!("No function contains 0x{:x}", addr))?
                .clone(),
        ),
        (None, Some(name)) => {
            Some(session.function_named(name).with_context(|| format!("No function named '{}'", name))?.clone())
        }
        (None, None) => None,
    };

    let wants_function = args.pseudo || args.disasm || args.cfg.is_some() || args.png.is_some();
    if wants_function && selected.is_none() {
        bail!("--pseudo, --disasm, --cfg and --png need --function or --name");
    }

    if let Some(function) = &selected {
        session.xrefs_mut().navigate_to(function.start);
        export_cfg(&session, function, &args)?;
    }
    if let Some(addr) = args.xrefs {
        session.xrefs_mut().navigate_to(addr);
    }

    let disassembly = match (&selected, args.disasm) {
        (Some(function), true) => Some(disassembly_lines(&session, function)?),
        _ => None,
    };
    let pseudo_code = match (&selected, args.pseudo) {
        (Some(function), true) => Some(session.pseudo_code_for(function.start)?),
        _ => None,
    };
    let strings = if args.strings {
        let scan_ctx = AnalysisContext::new().with_cancel_token(ctx.cancel_token());
        let found = session
            .disassembler()
            .extract_strings_quick(session.config().min_string_length, &scan_ctx)
            .context("String extraction failed")?;
        Some(found)
    } else {
        None
    };

    if args.json {
        let report = JsonReport {
            summary: session.summary(),
            function: selected.as_ref(),
            disassembly,
            pseudo_code,
            xrefs_to: args.xrefs.map(|addr| session.xrefs_to(addr)),
            xrefs_from: args.xrefs.map(|addr| session.xrefs_from(addr)),
            strings,
        };
        println!("{}", serde_json::to_string_pretty(&report).context("Failed to serialize report")?);
        return Ok(());
    }

    println!("{} Found {} functions, {} cross-references", "[+]".green(), function_count, xref_count);
    println!();

    if let Some(function) = &selected {
        print_function_header(function);
    }
    if let Some(lines) = disassembly {
        for line in lines {
            println!("  {}", line);
        }
        println!();
    }
    if let Some(code) = pseudo_code {
        println!("{}", code);
    }
    if let Some(addr) = args.xrefs {
        print_xrefs(&session, addr);
    }
    if args.classes {
        print_classes(&session);
    }
    if let Some(strings) = strings {
        println!("{}", format!("Strings ({})", strings.len()).yellow().bold());
        for s in strings {
            println!("  0x{:016x}  {}", s.address, s.text.escape_debug());
        }
        println!();
    }

    let evicted = session.evict_stale();
    log::debug!("Evicted {} idle cache entries", evicted);

    println!("{}", "=".repeat(50).cyan());
    println!("{} Cache: {}", "[*]".blue(), session.cache_stats());
    println!("{} Analysis complete in {:.2}s", "[+]".green(), start_time.elapsed().as_secs_f64());
    Ok(())
}

fn export_cfg(session: &AnalysisSession, function: &DetectedFunction, args: &Args) -> Result<()> {
    if args.cfg.is_none() && args.png.is_none() {
        return Ok(());
    }
    let cfg = session.cfg_for(function.start)?;
    let exporter = DotExporter::new(&cfg).with_resolver(session.resolver()).with_instructions(true);

    if let Some(path) = &args.cfg {
        exporter.write_dot(path).with_context(|| format!("Failed to write {}", path.display()))?;
        if !args.json {
            println!("{} CFG ({} blocks) saved to: {}", "[+]".green(), cfg.len(), path.display());
        }
    }
    if let Some(path) = &args.png {
        exporter.render_png(path).with_context(|| format!("Failed to render {}", path.display()))?;
        if !args.json {
            println!("{} CFG image saved to: {}", "[+]".green(), path.display());
        }
    }
    Ok(())
}

fn disassembly_lines(session: &AnalysisSession, function: &DetectedFunction) -> Result<Vec<String>> {
    let instructions = session.disassemble_function(function.start)?;
    let resolver = session.resolver();
    Ok(instructions
        .iter()
        .map(|instr| {
            let note = instr
                .branch_target()
                .or_else(|| instr.pc_relative_target())
                .and_then(|target| resolver.comment_for_address(target));
            match note {
                Some(note) => format!("{} ; {}", instr, note),
                None => instr.to_string(),
            }
        })
        .collect())
}

fn print_function_header(function: &DetectedFunction) {
    let confidence = if function.low_confidence { "low confidence".red() } else { "ok".green() };
    println!(
        "{} 0x{:x} - 0x{:x} ({} instructions, {:?}) [{}]",
        function.display_name().cyan().bold(),
        function.start,
        function.end,
        function.instruction_count,
        function.source,
        confidence
    );
    if !function.called_from.is_empty() {
        let callers: Vec<String> = function.called_from.iter().map(|a| format!("0x{:x}", a)).collect();
        println!("  called from: {}", callers.join(", "));
    }
    println!();
}

fn print_xrefs(session: &AnalysisSession, addr: u64) {
    let name = session.symbol_at(addr).name;
    println!("{}", format!("Cross-references for 0x{:x} ({})", addr, name).yellow().bold());

    let incoming = session.xrefs_to(addr);
    println!("  {} ({}):", "to".cyan(), incoming.len());
    for xref in incoming {
        println!("    {}", xref);
    }
    let outgoing = session.xrefs_from(addr);
    println!("  {} ({}):", "from".cyan(), outgoing.len());
    for xref in outgoing {
        println!("    {}", xref);
    }
    println!();
}

fn print_classes(session: &AnalysisSession) {
    let objc = session.objc();
    println!("{}", format!("Objective-C classes ({})", objc.classes.len()).yellow().bold());
    for class in objc.classes.values() {
        match &class.superclass {
            Some(superclass) => println!("  {} : {}", class.name.cyan(), superclass),
            None => println!("  {}", class.name.cyan()),
        }
        for method in class.methods() {
            println!("    {} 0x{:x}", method.display_name(&class.name), method.implementation);
        }
    }
    for category in &objc.categories {
        println!("  {}", category.qualified_name().cyan());
    }
    println!();
}
