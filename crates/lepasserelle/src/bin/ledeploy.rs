// LeDeploy command-line entry point

use std::process::ExitCode;

fn main() -> ExitCode {
    lepasserelle::cli::main()
}
