//! Network transfer of model artifacts into the download staging area.

mod downloader;
mod fetcher;

pub use downloader::{DownloadProgress, ModelDownloader};
pub use fetcher::{ByteStream, FetchResponse, Fetcher, HttpFetcher};

#[cfg(test)]
pub(crate) use fetcher::tests::MemoryFetcher;
