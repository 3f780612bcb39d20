use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    snipdex_cli::main_entry().await
}
