use anyhow::Result;
use harvest_config::Config;
use harvest_statsd::MetricsConfig;

/// Rejects configurations that would never send synthetic events.
pub fn check_config(config: &Config) -> Result<()> {
    let synthetics = &config.harvest().synthetics;
    if synthetics.max_pending_batches > 0 && synthetics.max_batches_per_harvest == 0 {
        anyhow::bail!(
            "`harvest.synthetics.max_batches_per_harvest` must be greater than 0 \
             if synthetic batches are queued",
        );
    }

    for app_name in config.app_names() {
        let events = config.transaction_events(app_name);
        if events.target_samples_stored > events.max_samples_stored {
            harvest_log::warn!(
                app = app_name,
                "target_samples_stored ({}) exceeds max_samples_stored ({})",
                events.target_samples_stored,
                events.max_samples_stored,
            );
        }
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    if config.path().as_os_str().is_empty() {
        harvest_log::info!("launching harvest without config folder");
    } else {
        harvest_log::info!(
            "launching harvest from config folder {}",
            config.path().display()
        );
    }

    let events = config.default_transaction_events();
    harvest_log::info!("  transaction events enabled: {}", events.enabled);
    harvest_log::info!("  max samples stored: {}", events.max_samples_stored);
    harvest_log::info!("  report period: {:?}", config.harvest().report_period());
    harvest_log::info!("  log level: {}", config.logging().level);
}

/// Initialize the metric system.
pub fn init_metrics(config: &Config) -> Result<()> {
    let Some(host) = config.statsd_addr() else {
        return Ok(());
    };

    harvest_statsd::init(MetricsConfig {
        prefix: config.metrics_prefix().to_owned(),
        host: host.to_owned(),
        default_tags: config.metrics_default_tags().clone(),
        default_sample_rate: config.metrics_sample_rate().into(),
    })?;

    Ok(())
}
