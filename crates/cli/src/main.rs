use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{command, Arg, ArgAction, ArgGroup};
use standalone_archive::archive::{Encoding, FieldKind, ModuleFormat, Side};
use standalone_archive as standalone;
use standalone_archive::{Matcher, Outcome, Rewriter, SubstituteOptions};

/// Every input was already up to date.
const EXIT_UNCHANGED: u8 = 3;

fn main() -> Result<ExitCode> {
    let matches = command!()
        .max_term_width(100)
        .args(&[
            Arg::new("input")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf))
                .action(ArgAction::Append)
                .help("The standalone executables or bundled scripts to process"),
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("file")
                .value_parser(clap::value_parser!(PathBuf))
                .requires("replace")
                .help("Write the result here instead of rewriting the input. Requires a single input"),
            Arg::new("marker")
                .long("marker")
                .value_name("text")
                .value_parser(clap::value_parser!(String))
                .help("Select the module whose contents contain <text>"),
            Arg::new("name-pattern")
                .long("name-pattern")
                .value_name("text")
                .value_parser(clap::value_parser!(String))
                .action(ArgAction::Append)
                .help("Fall back to the first module whose name contains <text>"),
            Arg::new("bunfs-entry")
                .long("bunfs-entry")
                .action(ArgAction::SetTrue)
                .help("Fall back to the first module in the virtual filesystem root"),
            Arg::new("no-bytecode-fallback")
                .long("no-bytecode-fallback")
                .action(ArgAction::SetTrue)
                .help("Do not search module bytecode for the marker"),
            Arg::new("list")
                .long("list")
                .action(ArgAction::SetTrue)
                .help("Print the archive header and module table"),
            Arg::new("extract")
                .long("extract")
                .value_name("file")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Write the selected payload to <file>, or - for stdout. Requires a single input"),
            Arg::new("replace")
                .long("replace")
                .value_name("file")
                .value_parser(clap::value_parser!(PathBuf))
                .help("Replace the selected payload with the contents of <file>"),
            Arg::new("backup")
                .long("backup")
                .action(ArgAction::SetTrue)
                .help("Copy each input before rewriting it, unless a copy already exists"),
            Arg::new("backup-suffix")
                .long("backup-suffix")
                .value_name("suffix")
                .value_parser(clap::value_parser!(String))
                .default_value(".backup")
                .help("Appended to the input path to name the backup copy"),
            Arg::new("no-resign")
                .long("no-resign")
                .action(ArgAction::SetTrue)
                .help("Do not sign Mach-O files after rewriting them"),
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        ])
        .group(
            ArgGroup::new("operation")
                .args(["list", "extract", "replace"])
                .multiple(true)
                .required(true),
        )
        .get_matches();

    if matches.get_flag("verbose") {
        env_logger::builder()
            .format_level(false)
            .format_target(false)
            .filter_module("standalone_archive", log::LevelFilter::Debug)
            .init();
    }

    let inputs: Vec<&PathBuf> = matches
        .get_many::<PathBuf>("input")
        .unwrap_or_default()
        .collect();
    let single = inputs.len() == 1;

    let mut matcher = Matcher::default();
    matcher.marker = matches
        .get_one::<String>("marker")
        .map(|arg| arg.clone().into_bytes());
    matcher.name_patterns = matches
        .get_many::<String>("name-pattern")
        .unwrap_or_default()
        .map(|arg| arg.clone().into_bytes())
        .collect();
    matcher.bytecode_fallback = !matches.get_flag("no-bytecode-fallback");
    if matches.get_flag("bunfs-entry") {
        matcher = matcher.bunfs_entry();
    }
    let selects = matcher.marker.is_some() || !matcher.name_patterns.is_empty();

    if matches.get_flag("list") {
        for in_path in &inputs {
            list(in_path)?;
        }
    }

    if let Some(out_path) = matches.get_one::<PathBuf>("extract") {
        if !single {
            bail!("--extract requires a single input");
        }
        if !selects {
            bail!("--extract requires --marker, --name-pattern or --bunfs-entry");
        }
        let extracted = standalone::extract(inputs[0], &matcher).with_context(|| {
            format!("Failed to extract from '{}'", inputs[0].display())
        })?;
        if out_path == Path::new("-") {
            io::stdout()
                .lock()
                .write_all(&extracted.payload)
                .with_context(|| "Failed to write payload to stdout")?;
        } else {
            fs::write(out_path, &extracted.payload).with_context(|| {
                format!("Failed to write payload to '{}'", out_path.display())
            })?;
            eprintln!(
                "Extracted {} of module {} '{}' ({} bytes)",
                extracted.field,
                extracted.module.index,
                String::from_utf8_lossy(&extracted.module.name),
                extracted.payload.len()
            );
        }
    }

    let Some(payload_path) = matches.get_one::<PathBuf>("replace") else {
        return Ok(ExitCode::SUCCESS);
    };
    if !selects {
        bail!("--replace requires --marker, --name-pattern or --bunfs-entry");
    }
    let payload = fs::read(payload_path)
        .with_context(|| format!("Failed to read payload file '{}'", payload_path.display()))?;

    let mut options = SubstituteOptions::default();
    options.backup = matches.get_flag("backup");
    if let Some(suffix) = matches.get_one::<String>("backup-suffix") {
        options.backup_suffix = suffix.into();
    }
    options.resign = !matches.get_flag("no-resign");

    let results = if let Some(out_path) = matches.get_one::<PathBuf>("output") {
        if !single {
            bail!("--output requires a single input");
        }
        options.output = Some(out_path.clone());
        let result = standalone::extract(inputs[0], &matcher).and_then(|extracted| {
            standalone::substitute(
                inputs[0],
                &extracted.module,
                extracted.field,
                &payload,
                &options,
            )
        });
        vec![result]
    } else {
        standalone::substitute_all(&inputs, &matcher, &payload, &options)
    };

    let mut failed = false;
    let mut written = false;
    for (in_path, result) in inputs.iter().zip(results) {
        match result {
            Ok(Outcome::Written(report)) => {
                written = true;
                println!(
                    "{}: wrote {} byte archive, file is {} bytes",
                    in_path.display(),
                    report.archive_len,
                    report.file_len
                );
                if let Some(e) = report.resign_error {
                    eprintln!("{}: warning: {}", in_path.display(), e);
                }
            }
            Ok(Outcome::Unchanged) => {
                println!("{}: already up to date", in_path.display());
            }
            Err(e) => {
                failed = true;
                eprintln!(
                    "{:?}",
                    anyhow!(e).context(format!("Failed to rewrite '{}'", in_path.display()))
                );
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else if written {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_UNCHANGED)
    })
}

fn list(in_path: &Path) -> Result<()> {
    let in_file = fs::File::open(in_path)
        .with_context(|| format!("Failed to open input file '{}'", in_path.display()))?;
    let in_data = unsafe { memmap2::Mmap::map(&in_file) }
        .with_context(|| format!("Failed to map input file '{}'", in_path.display()))?;
    let in_data = &*in_data;
    let rewriter = Rewriter::parse(in_data, in_path)
        .with_context(|| format!("Failed to parse input file '{}'", in_path.display()))?;

    let (Some(archive), Some(location)) = (rewriter.archive(), rewriter.location()) else {
        println!("{}: script, {} bytes", in_path.display(), in_data.len());
        return Ok(());
    };
    let header = archive.header();
    println!(
        "{}: {} archive at {:#x}, {} bytes, {} byte length field, {:?} records",
        in_path.display(),
        location.format,
        location.file_offset,
        archive.data().len(),
        location.header_width.size(),
        archive.schema()
    );
    println!("  entry module: {}", header.entry_module_id);
    println!("  flags: {:#x}", header.flags);
    println!(
        "  compile args: {}",
        String::from_utf8_lossy(archive.compile_args())
    );
    for (index, module) in archive.modules().iter().enumerate() {
        println!(
            "  [{}] {}",
            index,
            String::from_utf8_lossy(archive.bytes(module.name))
        );
        println!(
            "      encoding {}, loader {}, format {}, side {}",
            flag(module.encoding, Encoding::from_raw(module.encoding)),
            module.loader,
            flag(module.module_format, ModuleFormat::from_raw(module.module_format)),
            flag(module.side, Side::from_raw(module.side)),
        );
        let lengths: Vec<String> = archive
            .schema()
            .fields()
            .iter()
            .filter(|kind| **kind != FieldKind::Name)
            .filter_map(|kind| Some(format!("{} {}", kind, module.field(*kind)?.length())))
            .collect();
        println!("      {}", lengths.join(", "));
    }
    Ok(())
}

fn flag<T: std::fmt::Debug>(raw: u8, value: Option<T>) -> String {
    match value {
        Some(value) => format!("{:?}", value),
        None => format!("unknown ({})", raw),
    }
}
