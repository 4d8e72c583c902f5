use anyhow::Result;
use clap::Parser;

use crate::ImageId;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct RemoveCommand {
    /// 图片 ID
    pub id: ImageId,
}

impl SubCommandExtend for RemoveCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;
        engine.remove(self.id).await?;
        Ok(())
    }
}
