use node::cli::Args;

fn main() -> anyhow::Result<()> {
    // Loads .env if present; missing files are fine.
    let _ = dotenvy::dotenv();
    logger::init();

    let args = argh::from_env::<Args>();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");
    runtime.block_on(node::run::run(args))
}
