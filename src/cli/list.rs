use anyhow::Result;
use clap::Parser;
use futures::TryStreamExt;

use crate::cli::{SubCommandExtend, description};
use crate::config::{Opts, OutputFormat};

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;

        match self.output_format {
            OutputFormat::Table => {
                let mut records = std::pin::pin!(engine.list_stream());
                while let Some(record) = records.try_next().await? {
                    println!("{}\t{}\t{}", record.id, record.filename, description(&record));
                }
            }
            OutputFormat::Json => {
                let records = engine.list().await?;
                println!("{}", serde_json::to_string_pretty(&records)?);
            }
        }
        Ok(())
    }
}
