//! 配准精度的队列评估.
//!
//! 输入输出位置见 `utils::loader`, 日志级别由 `$TRE_LOG` 控制 (默认 `info`).

mod prospective;
mod result;
mod runner;

fn main() -> runner::RunResult<()> {
    let level = std::env::var("TRE_LOG")
        .ok()
        .and_then(|s| s.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    simple_logger::SimpleLogger::new().with_level(level).init()?;

    let result = runner::run().map_err(|e| {
        log::error!("{e}");
        e
    })?;
    result.analyze();
    Ok(())
}
