use std::process::ExitCode;


#[tokio::main]
async fn main() -> ExitCode {
    adb_proxy::command::run().await
}
