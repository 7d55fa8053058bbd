use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match goldpath_cli::cli::run().await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("goldpath: {err:#}");
            ExitCode::FAILURE
        }
    }
}
