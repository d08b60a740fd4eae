#[macro_use]
extern crate clap;

use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process;

use clap::Arg;

#[derive(Debug)]
enum IoContext {
    ReadInput,
    WriteOutput,
}

#[derive(Debug)]
enum Error {
    Oasm(Box<oasm::Error>),
    Io(std::io::Error, IoContext, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err, context, path) => writeln!(
                f,
                "{} file \"{}\" failed: {}",
                match context {
                    IoContext::ReadInput => "Reading input",
                    IoContext::WriteOutput => "Writing output",
                },
                path.display(),
                err
            ),
            Error::Oasm(err) => {
                writeln!(f, "Assembly failed:")?;
                write!(f, "{}", err)
            }
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("The assembly source file")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("OUTPUT")
                .required(true)
                .help("The hex object file to write"),
        )
        .get_matches();

    let input = matches.value_of("INPUT").unwrap();
    let output = matches.value_of("output").unwrap();

    if let Err(err) = oasm_main(input, output) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn oasm_main(input: &str, output: &str) -> Result<(), Error> {
    let input_path = Path::new(input);

    let input_file = File::open(input_path)
        .map_err(|err| Error::Io(err, IoContext::ReadInput, input_path.to_owned()))?;
    let mut source = String::new();
    BufReader::new(input_file)
        .read_to_string(&mut source)
        .map_err(|err| Error::Io(err, IoContext::ReadInput, input_path.to_owned()))?;

    let object = oasm::assemble(&source, input).map_err(|err| {
        Error::Oasm(Box::new(match input_path.to_str() {
            Some(path) => err.with_path(path),
            None => err,
        }))
    })?;

    let output_path = PathBuf::from(output);
    let output_file = File::create(&output_path)
        .map_err(|err| Error::Io(err, IoContext::WriteOutput, output_path.clone()))?;
    BufWriter::new(output_file)
        .write_all(&object)
        .map_err(|err| Error::Io(err, IoContext::WriteOutput, output_path))?;

    Ok(())
}
