use std::process::ExitCode;

use magma_triage::MAGMA;

pub fn main() -> ExitCode {
    triage::cli::main(&MAGMA)
}
