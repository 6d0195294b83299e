use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::ValueParser;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::EnvFilter;

use clrdbg::breakpoints::{BreakpointCollection, BreakpointId, BreakpointRequest};
use clrdbg::ppdb::PdbFile;

fn list_documents(path: &Path, pdb: &PdbFile, matches: &ArgMatches) {
    println!("{}", path.display());
    if let Some(id) = pdb.pdb_id() {
        println!("  id: {id}");
    }
    if let Some(entry_point) = pdb.entry_point() {
        println!("  entry point: {entry_point:#010x}");
    }

    for document in pdb.documents() {
        let name = if matches.get_flag("basenames") {
            document.file_name()
        } else {
            document.file_path.as_str()
        };
        println!("  {} ({:?})", name, document.language);
        for method in &document.methods {
            println!(
                "    {:#010x} lines {}-{}",
                method.method_def, method.first_line, method.last_line
            );
        }
    }

    if pdb.skipped_documents() > 0 || pdb.skipped_methods() > 0 {
        println!(
            "  skipped {} documents and {} methods",
            pdb.skipped_documents(),
            pdb.skipped_methods()
        );
    }
}

fn execute(matches: &ArgMatches) -> Result<()> {
    let collection = BreakpointCollection::new();

    for path in matches.get_many::<PathBuf>("pdbs").unwrap_or_default() {
        let pdb = PdbFile::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if matches.get_flag("list") {
            list_documents(path, &pdb, matches);
        }
        collection.add_pdb(Arc::new(pdb));
    }

    let requests: Vec<BreakpointRequest> = matches
        .get_many::<BreakpointRequest>("breakpoints")
        .unwrap_or_default()
        .zip(1..)
        .map(|(request, id)| request.clone().with_id(BreakpointId(id)))
        .collect();
    collection
        .sync(requests)
        .context("invalid breakpoint request")?;

    let breakpoints = collection.breakpoints();
    if matches.get_flag("json") {
        let json = serde_json::to_string_pretty(&breakpoints)?;
        println!("{json}");
        return Ok(());
    }

    for breakpoint in &breakpoints {
        print!("{}:{}", breakpoint.file_path(), breakpoint.line());
        match breakpoint.location() {
            Some(location) => println!(
                " -> {:#010x}+{:#x} ({}:{}-{})",
                location.method_def,
                location.il_offset,
                location.file_path,
                location.start_line,
                location.end_line
            ),
            None => println!(" -> ??"),
        }
    }

    Ok(())
}

fn parse_request(request: &str) -> Result<BreakpointRequest> {
    request.parse().context("unable to parse breakpoint")
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let matches = Command::new("resolve_breakpoint")
        .about(
            "Resolves source breakpoints to method tokens and IL offsets \
             using Portable PDB files.",
        )
        .arg(
            Arg::new("pdbs")
                .short('p')
                .long("pdb")
                .required(true)
                .action(ArgAction::Append)
                .value_parser(value_parser!(PathBuf))
                .help(
                    "Path to a Portable PDB file. Can be given multiple times, \
                     files are searched in order.",
                ),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List the documents and methods of every PDB file."),
        )
        .arg(
            Arg::new("basenames")
                .short('s')
                .long("basenames")
                .action(ArgAction::SetTrue)
                .help("Display only the base of each file name when listing documents."),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the breakpoints as JSON."),
        )
        .arg(
            Arg::new("breakpoints")
                .num_args(0..)
                .value_parser(ValueParser::new(parse_request))
                .help("Breakpoints to resolve, as file:line or file:line:column."),
        )
        .get_matches();

    match execute(&matches) {
        Ok(()) => (),
        Err(e) => eprintln!("{:?}", e),
    };
}
