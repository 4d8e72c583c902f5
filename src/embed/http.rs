use anyhow::Result;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};

use super::Embedder;

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct TextRequest<'a> {
    text: &'a str,
}

/// 通过 HTTP 调用远程嵌入服务
///
/// - `POST {url}/embed/image`，请求体为原始图片数据
/// - `POST {url}/embed/text`，请求体为 `{"text": "..."}`
///
/// 两者都返回 `{"embedding": [...]}`。
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    dimension: Option<usize>,
}

impl HttpEmbedder {
    pub fn new(base_url: impl Into<String>, dimension: Option<usize>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), dimension }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn parse(response: reqwest::Response) -> Result<Vec<f32>> {
        let body = response.error_for_status()?.json::<EmbeddingResponse>().await?;
        Ok(body.embedding)
    }
}

impl Embedder for HttpEmbedder {
    fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let url = self.endpoint("embed/image");
        debug!("请求图片嵌入: {} ({} 字节)", url, bytes.len());
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(bytes.to_vec())
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let url = self.endpoint("embed/text");
        debug!("请求文本嵌入: {}", url);
        let response = self.client.post(url).json(&TextRequest { text }).send().await?;
        Self::parse(response).await
    }
}
