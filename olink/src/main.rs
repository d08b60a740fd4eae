#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use clap::Arg;

use olink::LinkOptions;

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUTS")
                .help("Object files and archives, in link order")
                .required(true)
                .multiple(true),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .required(true)
                .help("The bytecode file to write"),
        )
        .arg(
            Arg::with_name("optimize")
                .short("O")
                .help("Eliminate unreachable symbols"),
        )
        .arg(
            Arg::with_name("debug")
                .short("g")
                .help("Also write debug info to <OUTPUT>.od"),
        )
        .arg(
            Arg::with_name("wrap_header")
                .short("w")
                .long("wrap-header")
                .takes_value(true)
                .value_name("HEADER")
                .help("Prefix the output with 128 bytes from this file"),
        )
        .get_matches();

    let inputs: Vec<PathBuf> = matches
        .values_of("INPUTS")
        .unwrap()
        .map(PathBuf::from)
        .collect();
    let output = matches.value_of("output").unwrap();
    let options = LinkOptions {
        optimize: matches.is_present("optimize"),
        debug: matches.is_present("debug"),
    };

    if let Err(err) = olink_main(
        &inputs,
        output,
        matches.value_of("wrap_header"),
        &options,
    ) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn olink_main(
    inputs: &[PathBuf],
    output: &str,
    wrap_header: Option<&str>,
    options: &LinkOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = olink::link_files(inputs, options, output)?;

    let output_path = Path::new(output);
    let mut writer = BufWriter::new(File::create(output_path)?);
    if let Some(header) = wrap_header {
        writer.write_all(&olink::read_wrap_header(Path::new(header))?)?;
    }
    writer.write_all(&result.image)?;
    writer.flush()?;
    drop(writer);

    // Linked programs are directly executable on the host via the wrap
    // header, so mark them executable.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(output_path, std::fs::Permissions::from_mode(0o755))?;
    }

    if let Some(debug) = result.debug {
        let mut debug_writer = BufWriter::new(File::create(format!("{}.od", output))?);
        debug_writer.write_all(debug.as_bytes())?;
    }

    Ok(())
}
