use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use indicatif::ProgressBar;
use log::{info, warn};
use regex::Regex;

use crate::catalog::ImageRecord;
use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::embed::Embedder;
use crate::engine::{NewImage, SearchEngine};
use crate::utils::{pb_style, scan_images};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    /// 图片路径，如果是目录则递归扫描其中的图片
    pub path: PathBuf,
    /// 图片描述，添加目录时作用于其中的每一张图片
    #[arg(short, long)]
    pub description: Option<String>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = "jpg,jpeg,png,webp")]
    pub suffix: String,
    /// 同时添加的图片数量
    #[arg(short, long, value_name = "N", default_value_t = num_cpus::get())]
    pub jobs: usize,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = opts.engine.open(&opts.conf_dir).await?;

        if self.path.is_file() {
            let record = add_file(&engine, &self.path, self.description.clone()).await?;
            println!("{}\t{}", record.id, record.filename);
            return Ok(());
        }

        let re_suf = Regex::new(&format!("(?i)^({})$", self.suffix.replace(',', "|")))?;
        info!("扫描目录: {}", self.path.display());
        let paths = scan_images(&self.path, &re_suf);
        info!("共找到 {} 张图片", paths.len());

        let engine = Arc::new(engine);
        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        let failed = Arc::new(AtomicUsize::new(0));
        futures::stream::iter(paths)
            .for_each_concurrent(self.jobs.max(1), |path| {
                let engine = engine.clone();
                let pb = pb.clone();
                let failed = failed.clone();
                let description = self.description.clone();
                async move {
                    match add_file(&engine, &path, description).await {
                        Ok(record) => pb.set_message(record.filename),
                        Err(e) => {
                            pb.println(format!("添加图片失败 {}: {:#}", path.display(), e));
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    pb.inc(1);
                }
            })
            .await;
        pb.finish_with_message("添加完成");

        let failed = failed.load(Ordering::Relaxed);
        if failed > 0 {
            warn!("{} 张图片添加失败", failed);
        }
        Ok(())
    }
}

async fn add_file<E: Embedder>(
    engine: &SearchEngine<E>,
    path: &Path,
    description: Option<String>,
) -> Result<ImageRecord> {
    let bytes = tokio::fs::read(path).await?;
    let filename = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    };
    Ok(engine.add(NewImage { filename, bytes, description }).await?)
}
