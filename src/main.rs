//! Punto de entrada ("driver").
//!
//! Este módulo expone una CLI sobre [`yabal::compile`]: lee el archivo
//! principal, compila, imprime diagnósticos y escribe la imagen en el
//! formato solicitado.

use std::{
    fs::{self, File},
    io::{self, Write},
    process,
};

use anyhow::{self, Context};
use clap::{self, crate_version, Arg, Command};
use log::info;
use yabal::{compile, error::Severity, import::FileReader, link::ListingOptions, Options};

fn main() -> anyhow::Result<()> {
    // Parsing de CLI
    let args = Command::new("Yabal compiler")
        .version(crate_version!())
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("INPUT")
                .help("Main source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .help("Output file, standard output by default"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .takes_value(true)
                .value_name("FORMAT")
                .default_value("asm")
                .possible_values(["asm", "hex", "logisim", "bin"])
                .help("Image format"),
        )
        .arg(
            Arg::new("no-optimize")
                .long("no-optimize")
                .help("Disable constant folding and dead code elimination"),
        )
        .arg(
            Arg::new("comments")
                .long("comments")
                .help("Annotate the listing with code generation comments"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Raise the log level, repeat for more detail"),
        )
        .get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Se extraen argumentos necesarios
    let input = args.value_of("input").unwrap_or_default();
    let format = args.value_of("format").unwrap_or("asm");
    let comments = args.is_present("comments");

    let options = Options {
        optimize: !args.is_present("no-optimize"),
        comments,
        ..Options::default()
    };

    let source =
        fs::read_to_string(input).with_context(|| format!("Failed to read source file: {}", input))?;

    let name = fs::canonicalize(input)
        .map(|path| path.to_string_lossy().into_owned())
        .unwrap_or_else(|_| input.to_owned());

    let compilation = compile(&source, &name, &options, &FileReader)
        .context("Internal error while linking the program")?;

    let threshold = match args.occurrences_of("verbose") {
        0 => Severity::Warning,
        _ => Severity::Debug,
    };

    let diagnostics = compilation.diagnostics();
    if diagnostics.iter().any(|(_, diagnostic)| diagnostic.severity <= threshold) {
        eprint!("{}", diagnostics.display(threshold));
    }

    let image = match compilation.image() {
        Some(image) if !diagnostics.has_errors() => image,
        _ => process::exit(1),
    };

    info!("Writing {} words as {}", image.words().len(), format);

    let mut listing = ListingOptions::VARIABLES;
    if comments {
        listing |= ListingOptions::COMMENTS;
    }

    let mut output: Box<dyn Write> = match args.value_of("output") {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("Failed to open for writing: {}", path))?,
        ),

        None => Box::new(io::stdout()),
    };

    match format {
        "bin" => image.write_binary(&mut output),
        "hex" => output.write_all(image.to_hex().as_bytes()),
        "logisim" => output.write_all(image.to_logisim().as_bytes()),
        _ => output.write_all(image.to_assembly(listing).as_bytes()),
    }
    .context("Failed to write output")?;

    Ok(())
}
