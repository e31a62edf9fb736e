use props_etl::{
    init_logging, log_app_start, log_paths_resolved, logging_config_from_env,
    pipeline_config_from_env, run_pipeline, PropsEtl,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let config = pipeline_config_from_env();
    log_paths_resolved(&config);

    let etl = PropsEtl::new(&config);
    let summary = run_pipeline(&etl)?;

    println!(
        "Wrote {} rows to {} in {} ms",
        summary.load.rows_written,
        summary.load.path.display(),
        summary.elapsed_ms
    );
    Ok(())
}
