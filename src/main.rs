#[macro_use]
extern crate clap;

use std::path::Path;
use std::process;

use clap::{AppSettings, Arg};

use ovm::constants::{HOST_ERROR_EXIT, MEMORY_SIZE};
use ovm::loader;
use ovm::Vm;

fn main() {
    let matches = app_from_crate!()
        .setting(AppSettings::TrailingVarArg)
        .setting(AppSettings::AllowLeadingHyphen)
        .arg(
            Arg::with_name("debugger")
                .short("d")
                .help("Reserved for attaching a debugger"),
        )
        .arg(
            Arg::with_name("PROGRAM")
                .help("The bytecode program to run")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("ARGS")
                .help("Arguments passed through to the program")
                .multiple(true),
        )
        .get_matches();

    let program = matches.value_of("PROGRAM").unwrap();
    let args: Vec<String> = matches
        .values_of("ARGS")
        .map(|values| values.map(str::to_string).collect())
        .unwrap_or_default();

    let mut vm = Vm::new(MEMORY_SIZE);
    if let Err(err) = loader::load_process(&mut vm, Path::new(program), &args) {
        eprintln!("ERROR: {}", err);
        process::exit(HOST_ERROR_EXIT);
    }

    match vm.run() {
        Ok(exit_code) => process::exit((exit_code & 0xFF) as i32),
        Err(fault) => {
            eprintln!("VM ERROR: {}", fault);
            process::exit(HOST_ERROR_EXIT);
        }
    }
}
