//! 嵌入模型
//!
//! 图片与文本被映射到同一个向量空间，搜索时用文本向量在图片向量中查找。

use std::future::Future;

use anyhow::Result;

mod hashing;
mod http;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbedder;

pub trait Embedder: Send + Sync {
    /// 输出向量的维度，需要等到第一次调用才能知道时返回 None
    fn dimension(&self) -> Option<usize>;

    fn embed_image(&self, bytes: &[u8]) -> impl Future<Output = Result<Vec<f32>>> + Send;

    fn embed_text(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

/// 命令行中选择的嵌入模型
pub enum AnyEmbedder {
    Hashing(HashingEmbedder),
    Http(HttpEmbedder),
}

impl Embedder for AnyEmbedder {
    fn dimension(&self) -> Option<usize> {
        match self {
            Self::Hashing(e) => e.dimension(),
            Self::Http(e) => e.dimension(),
        }
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        match self {
            Self::Hashing(e) => e.embed_image(bytes).await,
            Self::Http(e) => e.embed_image(bytes).await,
        }
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        match self {
            Self::Hashing(e) => e.embed_text(text).await,
            Self::Http(e) => e.embed_text(text).await,
        }
    }
}
