use anyhow::Context;
use peelite::AppConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info,wgpu_core=warn,wgpu_hal=warn,naga=warn"),
    )
    .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    log::info!(
        target: "oit",
        "starting in {} mode, transparency {:.2}, peel cap {}",
        config.mode,
        config.transparency,
        config.peel_cap.get()
    );

    peelite::run(config)
}
