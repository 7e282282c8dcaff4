// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// S3 兼容 HTTP 存储桶 (path-style: {endpoint}/{bucket}/{key})
// - 列表: ListObjectsV2 (list-type=2), 按 continuation-token 翻页
// - 下载: GET, x-amz-meta-* 响应头 → 元数据
// - 上传: PUT

use std::collections::BTreeMap;
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use url::Url;

use super::{is_image_key, ImageObject, ImageSource, SourceError};

const AMZ_META_PREFIX: &str = "x-amz-meta-";
const MAX_OBJECT_BYTES: u64 = 32 * 1024 * 1024;
/// 防止服务端返回异常分页时死循环
const MAX_LIST_PAGES: usize = 10_000;

pub struct HttpBucket {
    agent: ureq::Agent,
    endpoint: Url,
    bucket: String,
}

/// ListObjectsV2 单页结果
#[derive(Debug, Default, PartialEq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

impl HttpBucket {
    pub fn new(endpoint: &str, bucket: &str, timeout: Duration) -> Result<Self> {
        let endpoint =
            Url::parse(endpoint).with_context(|| format!("invalid bucket endpoint {endpoint}"))?;
        if endpoint.cannot_be_a_base() {
            anyhow::bail!("bucket endpoint must be an http(s) base url: {endpoint}");
        }
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Ok(Self {
            agent,
            endpoint,
            bucket: bucket.to_string(),
        })
    }

    fn bucket_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.bucket);
        }
        url
    }

    /// 对象 URL (每段单独百分号编码)
    pub fn object_url(&self, key: &str) -> Url {
        let mut url = self.bucket_url();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(key.split('/'));
        }
        url
    }

    fn list_url(&self, prefix: &str, token: Option<&str>) -> Url {
        let mut url = self.bucket_url();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("list-type", "2");
            query.append_pair("prefix", prefix);
            if let Some(token) = token {
                query.append_pair("continuation-token", token);
            }
        }
        url
    }

    fn http_error(key: &str, err: ureq::Error) -> SourceError {
        match err {
            ureq::Error::Status(404, _) => SourceError::NotFound(key.to_string()),
            ureq::Error::Status(code, resp) => SourceError::Http {
                key: key.to_string(),
                message: format!("status {code} {}", resp.status_text()),
            },
            ureq::Error::Transport(t) => SourceError::Http {
                key: key.to_string(),
                message: t.to_string(),
            },
        }
    }
}

impl ImageSource for HttpBucket {
    fn list_images(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let url = self.list_url(prefix, token.as_deref());
            let body = self
                .agent
                .request_url("GET", &url)
                .call()
                .map_err(|e| Self::http_error(prefix, e))
                .with_context(|| format!("failed to list s3://{}/{}", self.bucket, prefix))?
                .into_string()
                .context("failed to read list response")?;
            let page = parse_list_page(&body)?;
            keys.extend(page.keys.into_iter().filter(|k| is_image_key(k)));
            match page.next_token {
                Some(next) => token = Some(next),
                None => {
                    keys.sort();
                    keys.dedup();
                    return Ok(keys);
                }
            }
        }
        anyhow::bail!("listing s3://{}/{} did not terminate", self.bucket, prefix)
    }

    fn fetch(&self, key: &str) -> Result<ImageObject, SourceError> {
        let resp = self
            .agent
            .request_url("GET", &self.object_url(key))
            .call()
            .map_err(|e| Self::http_error(key, e))?;

        let mut metadata = BTreeMap::new();
        for name in resp.headers_names() {
            let lower = name.to_lowercase();
            if let Some(meta_key) = lower.strip_prefix(AMZ_META_PREFIX) {
                if let Some(value) = resp.header(&name) {
                    metadata.insert(meta_key.to_string(), value.to_string());
                }
            }
        }

        let mut bytes = Vec::new();
        resp.into_reader()
            .take(MAX_OBJECT_BYTES)
            .read_to_end(&mut bytes)
            .map_err(|source| SourceError::Io {
                key: key.to_string(),
                source,
            })?;

        Ok(ImageObject {
            key: key.to_string(),
            bytes,
            metadata,
        })
    }

    fn put(&self, key: &str, bytes: &[u8], content_type: &str) -> Result<(), SourceError> {
        self.agent
            .request_url("PUT", &self.object_url(key))
            .set("Content-Type", content_type)
            .send_bytes(bytes)
            .map_err(|e| Self::http_error(key, e))?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("s3://{} ({})", self.bucket, self.endpoint)
    }
}

/// 解析 ListObjectsV2 XML 响应
pub fn parse_list_page(xml: &str) -> Result<ListPage> {
    let key_re = Regex::new(r"<Key>([^<]*)</Key>")?;
    let truncated_re = Regex::new(r"<IsTruncated>\s*true\s*</IsTruncated>")?;
    let token_re = Regex::new(r"<NextContinuationToken>([^<]*)</NextContinuationToken>")?;

    let keys = key_re
        .captures_iter(xml)
        .map(|cap| xml_unescape(&cap[1]))
        .collect();
    let next_token = if truncated_re.is_match(xml) {
        let token = token_re
            .captures(xml)
            .map(|cap| xml_unescape(&cap[1]))
            .filter(|t| !t.is_empty());
        if token.is_none() {
            anyhow::bail!("truncated list response without continuation token");
        }
        token
    } else {
        None
    };
    Ok(ListPage { keys, next_token })
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
