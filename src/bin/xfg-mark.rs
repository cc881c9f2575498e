//! Mark XFG metadata in a PE file on disk and print what a debugger session
//! would have annotated.

use anyhow::{Context, Result};
use xfg_marker::commands;
use xfg_marker::config::MarkerConfig;
use xfg_marker::host::JsonSettingsFile;
use xfg_marker::loader::{load_pe_file, LoadLimits};
use xfg_marker::logging;
use xfg_marker::xfg::XfgMarker;

struct Options {
    image: String,
    settings: Option<String>,
    no_xrefs: bool,
    no_comments: bool,
    dump: bool,
}

fn run(opts: &Options) -> Result<()> {
    let mut loaded = load_pe_file(&opts.image, LoadLimits::default())
        .with_context(|| format!("failed to load {}", opts.image))?;

    let mut config = match &opts.settings {
        Some(path) => {
            let store = JsonSettingsFile::open(path)?;
            MarkerConfig::load(&store)
        }
        None => MarkerConfig::default(),
    };
    if opts.no_xrefs {
        config.add_xrefs = false;
    }
    if opts.no_comments {
        config.add_comments = false;
    }

    let marker = XfgMarker::new(loaded.width);
    let result = commands::xfg_mark(&mut loaded.host, &marker, &config, &[])?;
    println!("{}", result.summary());

    if opts.dump {
        let width = loaded.width;
        let annotations = loaded.host.annotations();
        for (address, size) in &annotations.data_marks {
            println!("data    {}  ({} bytes)", width.format_address(*address), size);
        }
        for (address, text) in &annotations.comments {
            println!("comment {}  {}", width.format_address(*address), text);
        }
        for (from, to) in &annotations.xrefs {
            println!(
                "xref    {} -> {}",
                width.format_address(*from),
                width.format_address(*to)
            );
        }
    }

    Ok(())
}

fn main() {
    let matches = clap::Command::new("xfg-mark")
        .version(env!("CARGO_PKG_VERSION"))
        .about("recover XFG type hashes from a PE image and correlate them with call sites")
        .arg(
            clap::Arg::new("verbose")
                .short('v')
                .long("verbose")
                .multiple_occurrences(true)
                .help("log verbose messages"),
        )
        .arg(clap::Arg::new("json").long("json").help("emit logs as JSON"))
        .arg(
            clap::Arg::new("no-xrefs")
                .long("no-xrefs")
                .help("do not add cross references"),
        )
        .arg(
            clap::Arg::new("no-comments")
                .long("no-comments")
                .help("do not add comments at call sites"),
        )
        .arg(
            clap::Arg::new("settings")
                .long("settings")
                .takes_value(true)
                .value_name("FILE")
                .help("JSON settings file holding the annotation toggles"),
        )
        .arg(
            clap::Arg::new("dump")
                .long("dump")
                .help("print the produced annotations"),
        )
        .arg(
            clap::Arg::new("image")
                .required(true)
                .index(1)
                .help("path to PE file"),
        )
        .get_matches();

    let filter = logging::filter_for_verbosity(matches.occurrences_of("verbose"));
    if matches.is_present("json") {
        logging::init_tracing_json_with_filter(filter);
    } else {
        logging::init_tracing_with_filter(filter);
    }

    let opts = Options {
        image: matches.value_of("image").unwrap_or_default().to_string(),
        settings: matches.value_of("settings").map(str::to_string),
        no_xrefs: matches.is_present("no-xrefs"),
        no_comments: matches.is_present("no-comments"),
        dump: matches.is_present("dump"),
    };

    if let Err(e) = run(&opts) {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
