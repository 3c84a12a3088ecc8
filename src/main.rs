// Copyright (c) 2021, Qualcomm Innovation Center, Inc. All rights reserved.
//
// SPDX-License-Identifier: BSD-3-Clause
use anyhow::{bail, Context, Result};
use clap::{crate_version, App, AppSettings, Arg, ArgMatches, SubCommand};
use indicatif::{ProgressBar, ProgressStyle};
use is_executable::IsExecutable;
use std::env;
use std::path::{Path, PathBuf};

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate clap;

pub mod afl;
pub mod collector;
pub mod environment;
pub mod process;
pub mod report;
pub mod runner;
pub mod store;
pub mod util;

pub mod debugger {
    pub mod gdb;
}

pub mod platform {
    pub mod linux;
}

use collector::CollectorKind;
use environment::AtriageEnv;
use report::ReportKind;
use runner::{Extractor, ExploitableExtractor, Outcome, PlaceholderPolicy, Runner, SanitizerExtractor};
use store::{CrashRecord, CrashStore};

arg_enum! {
    #[derive(PartialEq, Debug)]
    #[allow(non_camel_case_types)]
    pub enum OutputFormat {
        text,
        json
    }
}

fn selection_args<'a, 'b>(cmd: App<'a, 'b>) -> App<'a, 'b> {
    cmd.arg(
        Arg::with_name("all")
            .long("--all")
            .conflicts_with("index")
            .help("Select every crash in the store."),
    )
    .arg(
        Arg::with_name("index")
            .long("--index")
            .takes_value(true)
            .allow_hyphen_values(true)
            .help("Select a bucket by index. -1 is the most recent one."),
    )
}

fn timeout_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("timeout")
        .long("--timeout")
        .takes_value(true)
        .default_value("10000")
        .help("Milliseconds to wait for each crash to reproduce.")
}

fn setup_command_line() -> ArgMatches<'static> {
    build_app().get_matches()
}

fn build_app() -> App<'static, 'static> {
    App::new("atriage")
        .version(crate_version!())
        .about("Incrementally collect, deduplicate and reproduce fuzzer crashes")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("db")
             .long("--db")
             .takes_value(true)
             .global(true)
             .help("The crash store to use. Overrides ATRIAGE_DB."))
        .arg(Arg::with_name("debug")
             .long("--debug")
             .global(true)
             .help("Enable debug logging."))
        .subcommand(SubCommand::with_name("triage")
             .about("Collect new crashes from a fuzzer output directory")
             .arg(Arg::with_name("directory")
                  .required(true)
                  .index(1))
             .arg(Arg::with_name("collector")
                  .long("--collector")
                  .takes_value(true)
                  .possible_values(&CollectorKind::variants())
                  .default_value("afl")
                  .case_insensitive(true)
                  .help("The layout of the output directory.")))
        .subcommand(SubCommand::with_name("info")
             .about("Show the buckets in the crash store"))
        .subcommand(selection_args(SubCommand::with_name("list")
             .about("Print crash paths")))
        .subcommand(selection_args(SubCommand::with_name("gather")
             .about("Copy crash inputs into a directory")
             .arg(Arg::with_name("out")
                  .required(true)
                  .index(1))))
        .subcommand(SubCommand::with_name("samples")
             .about("List every input the fuzzer generated")
             .arg(Arg::with_name("directory")
                  .required(true)
                  .index(1))
             .arg(Arg::with_name("collector")
                  .long("--collector")
                  .takes_value(true)
                  .possible_values(&CollectorKind::variants())
                  .case_insensitive(true)
                  .help("The layout of the output directory. Defaults to the one used by triage.")))
        .subcommand(SubCommand::with_name("command")
             .about("Show or replace the target command. Use '@@' as a placeholder for the crash input path.")
             .setting(AppSettings::TrailingVarArg)
             .arg(Arg::with_name("text")
                  .multiple(true)
                  .allow_hyphen_values(true)
                  .index(1)))
        .subcommand(selection_args(SubCommand::with_name("asan")
             .about("Reproduce crashes and store their sanitizer reports")
             .arg(timeout_arg())
             .arg(Arg::with_name("strict")
                  .long("--strict")
                  .help("Refuse to run a command without a '@@' placeholder instead of using stdin."))))
        .subcommand(selection_args(SubCommand::with_name("exploitable")
             .about("Classify crashes with GDB and the exploitable plugin")
             .arg(timeout_arg())
             .arg(Arg::with_name("abort_on_error")
                  .long("--abort-on-error")
                  .help("Run the target with ASAN_OPTIONS=abort_on_error=1."))
             .arg(Arg::with_name("script")
                  .long("--script")
                  .takes_value(true)
                  .help("Path to exploitable.py. Overrides ATRIAGE_EXPLOITABLE_SCRIPT."))
             .arg(Arg::with_name("gdb")
                  .long("--gdb")
                  .takes_value(true)
                  .help("The GDB to use. Overrides ATRIAGE_GDB_PATH."))))
        .subcommand(SubCommand::with_name("show")
             .about("Print the stored reports of a crash")
             .arg(Arg::with_name("path")
                  .required(true)
                  .index(1))
             .arg(Arg::with_name("ofmt")
                  .long("--output-format")
                  .takes_value(true)
                  .possible_values(&OutputFormat::variants())
                  .default_value("text")
                  .case_insensitive(true)))
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn select_records(store: &CrashStore, args: &ArgMatches) -> Result<Vec<CrashRecord>> {
    if args.is_present("all") {
        return Ok(store.all_crashes()?);
    }

    let index = if args.is_present("index") {
        value_t!(args, "index", i64).unwrap_or_else(|e| e.exit())
    } else {
        -1
    };

    Ok(store.get_bucket(index)?)
}

fn stored_command(store: &CrashStore) -> Result<String> {
    match store.get_command()? {
        Some(command) => Ok(command),
        None => bail!("No target command stored. Set one with: atriage command <text>"),
    }
}

fn check_target(program: &str) -> Result<()> {
    let exe = PathBuf::from(program);

    // A PATH resolvable name
    if exe.components().count() == 1 {
        which::which(program).with_context(|| {
            format!("Binary {} not found in PATH. Try using the absolute path", program)
        })?;
    } else if !exe.is_executable() {
        bail!("Binary {} does not exist or is not executable", program);
    }

    Ok(())
}

fn triage(store: &mut CrashStore, args: &ArgMatches) -> Result<()> {
    let directory = Path::new(args.value_of("directory").unwrap_or_default());
    let kind = value_t!(args, "collector", CollectorKind).unwrap_or_else(|e| e.exit());
    let collector = kind.build();

    match store.get_collector()? {
        Some(previous) if previous != collector.name() => println!(
            "[!] This store was last filled by {}, now using {}",
            previous,
            collector.name()
        ),
        _ => (),
    }
    store.set_collector(collector.name())?;

    if store.get_command()?.is_none() {
        match collector.discover_command(directory) {
            Ok(Some(command)) => {
                println!("[+] Target command: {}", command);
                store.set_command(&command)?;
            }
            Ok(None) => println!(
                "[!] {} does not record the target command. Set one with: atriage command <text>",
                collector.name()
            ),
            Err(e) => println!("[!] Could not discover the target command: {}", e),
        }
    }

    let inputs = collector
        .discover_inputs(directory)
        .with_context(|| format!("Failed to collect crashes from {}", directory.display()))?;

    let added = store.save_new(&inputs)?;

    if added == 0 {
        println!("[+] No new crashes ({} known)", inputs.len());
    } else {
        println!(
            "[+] Found {} new crashes in bucket {}",
            added,
            store.current_bucket()?
        );
    }

    Ok(())
}

fn info(store: &CrashStore) -> Result<()> {
    let sizes = store.bucket_sizes()?;

    if sizes.is_empty() {
        println!("[!] Database is empty.");
    } else {
        println!("{:>6}  crashes", "index");

        let mut total = 0;
        for (i, (bucket, count)) in sizes.iter().enumerate() {
            if i == 0 {
                println!("{:>6}  {}", bucket, count);
            } else {
                println!("{:>6}  +{}", bucket, count);
            }
            total += count;
        }

        println!("{:>6}  {}", "total", total);
    }

    println!(
        "Command: {}",
        store.get_command()?.as_deref().unwrap_or("(not set)")
    );
    println!(
        "Collector: {}",
        store.get_collector()?.as_deref().unwrap_or("(not set)")
    );

    Ok(())
}

fn gather(store: &CrashStore, args: &ArgMatches) -> Result<()> {
    let out = Path::new(args.value_of("out").unwrap_or_default());
    let records = select_records(store, args)?;

    let failed = util::copy_files_to(records.iter().map(|r| r.path.as_path()), out)
        .with_context(|| format!("Failed to create {}", out.display()))?;

    for (path, e) in &failed {
        println!("[!] Failed to copy {}: {}", path.display(), e);
    }

    println!(
        "[+] Copied {} crashes to {}",
        records.len() - failed.len(),
        out.display()
    );

    Ok(())
}

fn samples(store: &CrashStore, args: &ArgMatches) -> Result<()> {
    let directory = Path::new(args.value_of("directory").unwrap_or_default());

    let kind = if args.is_present("collector") {
        value_t!(args, "collector", CollectorKind).unwrap_or_else(|e| e.exit())
    } else {
        store
            .get_collector()?
            .as_deref()
            .and_then(CollectorKind::from_collector_name)
            .unwrap_or(CollectorKind::afl)
    };

    for sample in kind.build().discover_all_samples(directory)? {
        println!("{}", sample.display());
    }

    Ok(())
}

fn command(store: &CrashStore, args: &ArgMatches) -> Result<()> {
    let text: Vec<&str> = args.values_of("text").map(|v| v.collect()).unwrap_or_default();

    match text.len() {
        0 => println!("{}", stored_command(store)?),
        1 => {
            store.set_command(text[0])?;
            println!("[+] Target command: {}", text[0]);
        }
        _ => {
            let joined = util::shell_join(&text);
            store.set_command(&joined)?;
            println!("[+] Target command: {}", joined);
        }
    }

    Ok(())
}

fn reproduce<E: Extractor>(
    store: &CrashStore,
    args: &ArgMatches,
    extractor: &E,
    policy: PlaceholderPolicy,
) -> Result<()> {
    let template = stored_command(store)?;
    let timeout_ms = value_t!(args, "timeout", u64).unwrap_or_else(|e| e.exit());
    let runner = Runner::new(timeout_ms).with_policy(policy);

    let argv = runner.parse_template(&template)?;
    check_target(&argv[0])?;

    let records = select_records(store, args)?;

    if records.is_empty() {
        println!("[!] No crashes selected");
        return Ok(());
    }

    println!(
        "[+] Reproducing {} crashes with {} ({}ms timeout)",
        records.len(),
        extractor.name(),
        timeout_ms
    );

    let pb = ProgressBar::new(records.len() as u64);
    let display_progress = util::isatty();

    if display_progress {
        pb.set_style(ProgressStyle::default_bar()
                     .template("[+] Reproducing {spinner:.green} [{pos}/{len} {elapsed_precise}] [{bar:.cyan/blue}] {msg}")
                     .progress_chars("#>-"));
        pb.enable_steady_tick(200);
    }

    let print_summary = |outcome: &Outcome| {
        if display_progress {
            pb.println(outcome.summary());
        } else {
            println!("{}", outcome.summary());
        }
    };

    let outcomes = runner.run_with(&template, &records, extractor, store, |record, outcome| {
        if let Some(outcome) = outcome {
            print_summary(outcome);
        }

        if display_progress {
            let name = record
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            pb.set_message(util::elide_size(&name, 40));
            pb.inc(1);
        }
    })?;

    pb.finish_and_clear();

    let timed_out = outcomes.iter().filter(|o| o.timed_out()).count();
    let reports = outcomes.len() - timed_out;

    println!(
        "[+] Reproduction stats [Reports: {}, Timed out: {}, No report: {}]",
        reports,
        timed_out,
        records.len() - outcomes.len()
    );

    if reports == 0 {
        println!("[!] None of the crashes produced a {} report. Make sure the target command is correct", extractor.kind());
    }

    Ok(())
}

fn asan(store: &CrashStore, args: &ArgMatches) -> Result<()> {
    if let Ok(val) = env::var("ASAN_OPTIONS") {
        println!("[!] Using ASAN_OPTIONS=\"{}\" that was set by the environment", val);
    }

    let policy = if args.is_present("strict") {
        PlaceholderPolicy::Strict
    } else {
        PlaceholderPolicy::Stdin
    };

    reproduce(store, args, &SanitizerExtractor, policy)
}

fn exploitable(store: &CrashStore, args: &ArgMatches, aenv: &AtriageEnv) -> Result<()> {
    let script = match args.value_of("script") {
        Some(script) => PathBuf::from(script),
        None => match &aenv.exploitable_script {
            Some(script) => script.clone(),
            None => bail!("No exploitable script given. Use --script or ATRIAGE_EXPLOITABLE_SCRIPT"),
        },
    };

    let gdb_path = args
        .value_of("gdb")
        .map(str::to_string)
        .unwrap_or_else(|| aenv.gdb_path.clone());

    let extractor = ExploitableExtractor::new(gdb_path, &script, args.is_present("abort_on_error"))?;

    if !extractor.has_supported_gdb() {
        bail!("GDB is not usable for triage. It must be built with python support");
    }

    reproduce(store, args, &extractor, PlaceholderPolicy::Stdin)
}

fn show(store: &CrashStore, args: &ArgMatches) -> Result<()> {
    let path = Path::new(args.value_of("path").unwrap_or_default());
    let format = value_t!(args, "ofmt", OutputFormat).unwrap_or_else(|e| e.exit());

    let record = match store.find_crash(path)? {
        Some(record) => record,
        None => bail!("{} is not in the crash store", path.display()),
    };

    let mut reports = vec![];
    for kind in &[ReportKind::Sanitizer, ReportKind::Exploitable] {
        if let Some(report) = store.report(record.id, *kind)? {
            reports.push(report);
        }
    }

    match format {
        OutputFormat::json => {
            let value = serde_json::json!({
                "crash": record,
                "reports": reports,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::text => {
            println!("Crash: {} (bucket {})", record.path.display(), record.bucket);

            if reports.is_empty() {
                println!("[!] No reports stored. Run atriage asan or atriage exploitable first");
            }

            for report in &reports {
                println!("--- {}: {} ---\n{}\n", report.kind(), report.headline(), report.text());
            }
        }
    }

    Ok(())
}

fn run(args: &ArgMatches) -> Result<()> {
    let aenv = environment::parse_atriage_env();

    let (name, sub) = match args.subcommand() {
        (name, Some(sub)) => (name, sub),
        _ => bail!("No subcommand given"),
    };

    let db_path = sub
        .value_of("db")
        .or_else(|| args.value_of("db"))
        .map(PathBuf::from)
        .unwrap_or_else(|| aenv.db_path.clone());

    log::debug!("Using crash store {}", db_path.display());

    // Only recording crashes or a command may start a new store
    let creates_store = match name {
        "triage" => true,
        "command" => sub.values_of("text").is_some(),
        _ => false,
    };

    let opened = if creates_store {
        CrashStore::open(&db_path)
    } else {
        CrashStore::open_existing(&db_path)
    };

    let mut store = opened.with_context(|| format!("Failed to open crash store {}", db_path.display()))?;

    match name {
        "triage" => triage(&mut store, sub),
        "info" => info(&store),
        "list" => {
            for record in select_records(&store, sub)? {
                println!("{}", record.path.display());
            }
            Ok(())
        }
        "gather" => gather(&store, sub),
        "samples" => samples(&store, sub),
        "command" => command(&store, sub),
        "asan" => asan(&store, sub),
        "exploitable" => exploitable(&store, sub, &aenv),
        "show" => show(&store, sub),
        _ => bail!("Unknown subcommand {}", name),
    }
}

fn main() {
    let args = setup_command_line();

    let debug = args.is_present("debug")
        || args.subcommand().1.map_or(false, |sub| sub.is_present("debug"));

    init_logging(debug);

    if let Err(e) = run(&args) {
        println!("[X] {:#}", e);
        std::process::exit(1);
    }
}
