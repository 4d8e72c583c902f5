use anyhow::Result;
use clap::Parser;

use crate::cli::{SubCommandExtend, description};
use crate::config::{Opts, OutputFormat};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    /// 查询文本
    pub query: String,
    /// 返回的结果数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 5)]
    pub top_k: usize,
    /// 输出格式
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;
        let hits = engine.search(&self.query, self.top_k).await?;

        match self.output_format {
            OutputFormat::Table => {
                for hit in &hits {
                    println!(
                        "{:.4}\t{}\t{}\t{}",
                        hit.similarity,
                        hit.record.id,
                        hit.record.filename,
                        description(&hit.record)
                    );
                }
            }
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&hits)?),
        }
        Ok(())
    }
}
