use anyhow::Result;
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::Opts;

// 需要独占数据目录，其他 imembed 进程运行时会失败
#[derive(Parser, Debug, Clone)]
pub struct CheckCommand {}

impl SubCommandExtend for CheckCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.builder(&opts.conf_dir).recover(false).open(opts.engine.embedder()).await?;
        let report = engine.reconcile().await?;
        if report.is_clean() {
            info!("没有发现不一致");
        }
        println!("{}", serde_json::to_string_pretty(&report)?);
        Ok(())
    }
}
