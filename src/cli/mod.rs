mod add;
mod check;
mod get;
mod list;
mod remove;
mod search;
mod stats;

pub use add::*;
pub use check::*;
pub use get::*;
pub use list::*;
pub use remove::*;
pub use search::*;
pub use stats::*;

use crate::catalog::ImageRecord;
use crate::config::Opts;

/// 没有描述的图片在输出中显示的文本
pub const NO_DESCRIPTION: &str = "No description provided.";

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

fn description(record: &ImageRecord) -> &str {
    record.description.as_deref().unwrap_or(NO_DESCRIPTION)
}
