use anyhow::Result;

use super::Embedder;

/// 基于特征哈希的本地嵌入，不需要任何模型文件
///
/// 文本按非字母数字字符切分为小写词元，每个词元由 blake3 哈希映射到一个维度和一个符号。
/// 图片数据按 UTF-8 解码后以同样方式处理，因此只适合测试和离线演示。
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1) }
    }

    pub fn embed_tokens(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        for token in text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            let hash = blake3::hash(token.to_lowercase().as_bytes());
            let bytes = hash.as_bytes();
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        Ok(self.embed_tokens(&String::from_utf8_lossy(bytes)))
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_tokens(text))
    }
}
