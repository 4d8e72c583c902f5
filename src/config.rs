use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use serde::Serialize;

use crate::cli::*;
use crate::embed::{AnyEmbedder, HashingEmbedder, HttpEmbedder};
use crate::engine::{EngineBuilder, SearchEngine};
use crate::index::HnswParams;

/// 本地哈希嵌入的默认维度
const DEFAULT_HASHING_DIM: usize = 512;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "imembed", "imembed")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imembed"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imembed")
}

#[derive(Parser, Debug, Clone)]
pub struct EngineOptions {
    /// 向量索引类型
    #[arg(long, value_enum, global = true, default_value_t = IndexKind::Flat)]
    pub index: IndexKind,
    /// 嵌入模型
    #[arg(long, value_enum, global = true, default_value_t = EmbedderKind::Hashing)]
    pub embedder: EmbedderKind,
    /// 远程嵌入服务地址，仅在 `--embedder http` 时使用
    #[arg(long, value_name = "URL", global = true, default_value = "http://127.0.0.1:8000")]
    pub embedder_url: String,
    /// 向量维度，使用远程嵌入服务时可以不指定，由第一张图片决定
    #[arg(long, value_name = "D", global = true)]
    pub dim: Option<usize>,
    /// 单次嵌入计算的超时时间，单位为秒
    #[arg(long, value_name = "SECS", global = true, value_parser = parse_timeout)]
    pub embed_timeout: Option<Duration>,
    /// 精确索引的分片数量
    #[arg(long, value_name = "N", global = true, default_value_t = num_cpus::get())]
    pub shards: usize,
    /// HNSW 每个节点的最大连接数
    #[arg(long, value_name = "N", global = true, default_value_t = 16)]
    pub max_connections: usize,
    /// HNSW 构建时每次访问的节点数量
    #[arg(long, value_name = "N", global = true, default_value_t = 200)]
    pub ef_construction: usize,
    /// HNSW 搜索时每次访问的节点数量
    #[arg(long, value_name = "N", global = true, default_value_t = 64)]
    pub ef_search: usize,
}

impl EngineOptions {
    pub fn embedder(&self) -> AnyEmbedder {
        match self.embedder {
            EmbedderKind::Hashing => AnyEmbedder::Hashing(HashingEmbedder::new(self.dim.unwrap_or(DEFAULT_HASHING_DIM))),
            EmbedderKind::Http => AnyEmbedder::Http(HttpEmbedder::new(self.embedder_url.clone(), self.dim)),
        }
    }

    pub fn hnsw(&self) -> HnswParams {
        HnswParams {
            max_connections: self.max_connections,
            ef_construction: self.ef_construction,
            ef_search: self.ef_search,
            ..Default::default()
        }
    }

    pub fn builder(&self, conf_dir: &ConfDir) -> EngineBuilder {
        EngineBuilder::new(conf_dir.clone())
            .index(self.index)
            .hnsw(self.hnsw())
            .shards(self.shards)
            .embed_timeout(self.embed_timeout)
    }

    pub async fn open(&self, conf_dir: &ConfDir) -> Result<SearchEngine<AnyEmbedder>> {
        self.builder(conf_dir).open(self.embedder()).await
    }
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let secs = s.parse::<f64>().map_err(|e| e.to_string())?;
    match Duration::try_from_secs_f64(secs) {
        Ok(timeout) if !timeout.is_zero() => Ok(timeout),
        _ => Err(format!("超时时间必须是正数: {s}")),
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imembed", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imembed 数据目录
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub engine: EngineOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 添加图片，可以是单个文件或目录
    Add(AddCommand),
    /// 列出所有图片
    List(ListCommand),
    /// 用文本搜索图片
    Search(SearchCommand),
    /// 导出图片的原始数据
    Get(GetCommand),
    /// 删除图片
    Remove(RemoveCommand),
    /// 检查并修复目录、索引与图片存储之间的不一致
    Check(CheckCommand),
    /// 显示统计信息
    Stats(StatsCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回目录数据库的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("imembed.db")
    }

    /// 返回向量日志的路径
    pub fn vectors(&self) -> PathBuf {
        self.path.join("vectors")
    }

    /// 返回图片存储的路径
    pub fn blobs(&self) -> PathBuf {
        self.path.join("images")
    }

    /// 返回进程锁文件的路径
    pub fn lock(&self) -> PathBuf {
        self.path.join("imembed.lock")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IndexKind {
    /// 精确的暴力搜索
    Flat,
    /// HNSW 近似搜索
    Hnsw,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedderKind {
    /// 本地特征哈希，只适合测试
    Hashing,
    /// 远程嵌入服务
    Http,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_engine_options() {
        let opts = Opts::parse_from([
            "imembed", "search", "red apple", "-k", "3", "--index", "hnsw", "-c", "/tmp/x", "--embed-timeout", "1.5",
        ]);
        assert_eq!(opts.engine.index, IndexKind::Hnsw);
        assert_eq!(opts.engine.embedder, EmbedderKind::Hashing);
        assert_eq!(opts.engine.embed_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(opts.conf_dir.database(), PathBuf::from("/tmp/x/imembed.db"));
        match opts.subcmd {
            SubCommand::Search(cmd) => {
                assert_eq!(cmd.query, "red apple");
                assert_eq!(cmd.top_k, 3);
            }
            _ => panic!("unexpected subcommand"),
        }
    }

    #[test]
    fn rejects_invalid_timeout() {
        for value in ["-1", "NaN", "0", "inf", "soon"] {
            let result = Opts::try_parse_from(["imembed", "list", "--embed-timeout", value]);
            assert!(result.is_err(), "accepted {value}");
        }
    }

    #[test]
    fn search_defaults_to_five_results() {
        let opts = Opts::parse_from(["imembed", "search", "cat"]);
        match opts.subcmd {
            SubCommand::Search(cmd) => assert_eq!(cmd.top_k, 5),
            _ => panic!("unexpected subcommand"),
        }
    }

    #[test]
    fn http_embedder_keeps_dimension_open() {
        let opts = Opts::parse_from(["imembed", "--embedder", "http", "list"]);
        assert!(matches!(opts.engine.embedder(), AnyEmbedder::Http(_)));
        let opts = Opts::parse_from(["imembed", "list", "--dim", "64"]);
        assert!(matches!(opts.engine.embedder(), AnyEmbedder::Hashing(_)));
    }
}
