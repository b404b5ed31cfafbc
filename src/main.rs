use std::process::ExitCode;

fn main() -> ExitCode {
    match csv_unify::run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(csv_unify::errors::exit_code_for(&err) as u8)
        }
    }
}
