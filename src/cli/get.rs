use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use crate::ImageId;
use crate::cli::SubCommandExtend;
use crate::config::Opts;

#[derive(Parser, Debug, Clone)]
pub struct GetCommand {
    /// 图片 ID
    pub id: ImageId,
    /// 输出文件，不指定时写入标准输出
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for GetCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;
        let bytes = engine.get_blob(self.id).await?;

        match &self.output {
            Some(path) => {
                tokio::fs::write(path, &bytes).await?;
                info!("图片 {} 已保存到 {}", self.id, path.display());
            }
            None => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(&bytes)?;
                stdout.flush()?;
            }
        }
        Ok(())
    }
}
