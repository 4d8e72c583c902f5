use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::metrics;

#[derive(Parser, Debug, Clone)]
pub struct StatsCommand {
    /// 同时输出 Prometheus 格式的指标
    ///
    /// 指标只统计当前进程，命令行中只包含打开数据目录时一致性检查的结果，
    /// 长期运行的服务应当自行调用 `metrics::gather` 导出。
    #[arg(long)]
    pub metrics: bool,
}

impl SubCommandExtend for StatsCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;
        let stats = engine.stats().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        if self.metrics {
            print!("{}", metrics::gather());
        }
        Ok(())
    }
}
