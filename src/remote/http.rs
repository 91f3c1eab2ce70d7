// 该文件是 Faune （野望） 项目的一部分。
// src/remote/http.rs - 对象存储与远程分析的 HTTP 客户端
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use reqwest::{
  Client,
  multipart::{Form, Part},
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{AnalysisEndpoint, AnalysisRequest, AnalysisResponse, ObjectStore, RemoteError};

const UPLOAD_FILE_FIELD: &str = "file";

fn client(timeout: Duration) -> Result<Client, RemoteError> {
  Ok(Client::builder().timeout(timeout).build()?)
}

/// 上传响应；同时给出两者时优先使用 `secure_url`
#[derive(Debug, Deserialize)]
struct UploadResponse {
  #[serde(default)]
  url: Option<String>,
  #[serde(default)]
  secure_url: Option<String>,
}

impl UploadResponse {
  fn into_url(self) -> Result<Url, RemoteError> {
    let url = self
      .secure_url
      .or(self.url)
      .ok_or_else(|| RemoteError::InvalidResponse("上传响应中缺少 url 字段".into()))?;
    Ok(Url::parse(&url)?)
  }
}

/// multipart 表单上传
pub struct HttpObjectStore {
  client: Client,
  upload_url: Url,
  fields: BTreeMap<String, String>,
}

impl HttpObjectStore {
  pub fn new(upload_url: Url, timeout: Duration) -> Result<Self, RemoteError> {
    Ok(Self {
      client: client(timeout)?,
      upload_url,
      fields: BTreeMap::new(),
    })
  }

  pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
    self.fields = fields;
    self
  }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
  async fn upload(&self, image: Vec<u8>, file_name: &str) -> Result<Url, RemoteError> {
    let size = image.len();
    let part = Part::bytes(image)
      .file_name(file_name.to_string())
      .mime_str("image/jpeg")?;
    let form = self
      .fields
      .iter()
      .fold(Form::new(), |form, (k, v)| form.text(k.clone(), v.clone()))
      .part(UPLOAD_FILE_FIELD, part);

    debug!("上传 {} ({} 字节) 到 {}", file_name, size, self.upload_url);
    let response = self
      .client
      .post(self.upload_url.clone())
      .multipart(form)
      .send()
      .await?
      .error_for_status()?;
    response.json::<UploadResponse>().await?.into_url()
  }
}

/// `POST {"image_url": ...}` → `{"label": ..., "score": "NN%"}`
pub struct HttpAnalysisEndpoint {
  client: Client,
  analyze_url: Url,
}

impl HttpAnalysisEndpoint {
  pub fn new(analyze_url: Url, timeout: Duration) -> Result<Self, RemoteError> {
    Ok(Self {
      client: client(timeout)?,
      analyze_url,
    })
  }
}

#[async_trait]
impl AnalysisEndpoint for HttpAnalysisEndpoint {
  async fn analyze(&self, image_url: &Url) -> Result<AnalysisResponse, RemoteError> {
    let request = AnalysisRequest {
      image_url: image_url.to_string(),
    };
    let response = self
      .client
      .post(self.analyze_url.clone())
      .json(&request)
      .send()
      .await?
      .error_for_status()?;
    Ok(response.json().await?)
  }
}

#[cfg(test)]
mod tests {
  use mockito::{Matcher, Server};
  use serde_json::json;

  use super::*;

  const TIMEOUT: Duration = Duration::from_secs(5);

  #[test]
  fn upload_response_prefers_secure_url() {
    let body = r#"{"url": "http://cdn.test/a.jpg", "secure_url": "https://cdn.test/a.jpg"}"#;
    let response: UploadResponse = serde_json::from_str(body).unwrap();
    assert_eq!(response.into_url().unwrap().as_str(), "https://cdn.test/a.jpg");

    let response: UploadResponse = serde_json::from_str(r#"{"url": "http://cdn.test/b.jpg"}"#).unwrap();
    assert_eq!(response.into_url().unwrap().as_str(), "http://cdn.test/b.jpg");
  }

  #[test]
  fn upload_response_without_url_is_invalid() {
    let response: UploadResponse = serde_json::from_str(r#"{"public_id": "x"}"#).unwrap();
    assert!(matches!(
      response.into_url(),
      Err(RemoteError::InvalidResponse(_))
    ));
  }

  #[test]
  fn analysis_request_serializes_image_url() {
    let request = AnalysisRequest {
      image_url: "https://cdn.test/a.jpg".into(),
    };
    assert_eq!(
      serde_json::to_string(&request).unwrap(),
      r#"{"image_url":"https://cdn.test/a.jpg"}"#
    );
  }

  #[tokio::test]
  async fn analyze_posts_image_url_as_json() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/analyze")
      .match_header("content-type", "application/json")
      .match_body(Matcher::Json(json!({"image_url": "https://cdn.test/frame-7.jpg"})))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"label": "Renard", "score": "87%"}"#)
      .create_async()
      .await;

    let endpoint =
      HttpAnalysisEndpoint::new(Url::parse(&format!("{}/analyze", server.url())).unwrap(), TIMEOUT)
        .unwrap();
    let response = endpoint
      .analyze(&Url::parse("https://cdn.test/frame-7.jpg").unwrap())
      .await
      .unwrap();

    assert_eq!(
      response,
      AnalysisResponse {
        label: "Renard".into(),
        score: "87%".into(),
      }
    );
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn upload_sends_file_part_and_extra_fields() {
    let mut server = Server::new_async().await;
    let mock = server
      .mock("POST", "/upload")
      .match_header("content-type", Matcher::Regex("^multipart/form-data".into()))
      .match_body(Matcher::AllOf(vec![
        Matcher::Regex(r#"name="file"; filename="frame-3.jpg""#.into()),
        Matcher::Regex("image/jpeg".into()),
        Matcher::Regex("jpegdata".into()),
        Matcher::Regex(r#"name="upload_preset""#.into()),
        Matcher::Regex("faune".into()),
      ]))
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(
        r#"{"url": "http://cdn.test/frame-3.jpg", "secure_url": "https://cdn.test/frame-3.jpg"}"#,
      )
      .create_async()
      .await;

    let store =
      HttpObjectStore::new(Url::parse(&format!("{}/upload", server.url())).unwrap(), TIMEOUT)
        .unwrap()
        .with_fields(BTreeMap::from([("upload_preset".to_string(), "faune".to_string())]));
    let url = store
      .upload(b"jpegdata".to_vec(), "frame-3.jpg")
      .await
      .unwrap();

    assert_eq!(url.as_str(), "https://cdn.test/frame-3.jpg");
    mock.assert_async().await;
  }

  #[tokio::test]
  async fn server_error_maps_to_http_error() {
    let mut server = Server::new_async().await;
    let analyze = server
      .mock("POST", "/analyze")
      .with_status(500)
      .with_body("internal error")
      .create_async()
      .await;
    let upload = server
      .mock("POST", "/upload")
      .with_status(503)
      .create_async()
      .await;

    let endpoint =
      HttpAnalysisEndpoint::new(Url::parse(&format!("{}/analyze", server.url())).unwrap(), TIMEOUT)
        .unwrap();
    let error = endpoint
      .analyze(&Url::parse("https://cdn.test/frame-1.jpg").unwrap())
      .await
      .unwrap_err();
    assert!(matches!(
      error,
      RemoteError::Http(ref e) if e.status() == Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR)
    ));

    let store =
      HttpObjectStore::new(Url::parse(&format!("{}/upload", server.url())).unwrap(), TIMEOUT)
        .unwrap();
    let error = store
      .upload(b"jpegdata".to_vec(), "frame-1.jpg")
      .await
      .unwrap_err();
    assert!(matches!(
      error,
      RemoteError::Http(ref e) if e.status() == Some(reqwest::StatusCode::SERVICE_UNAVAILABLE)
    ));

    analyze.assert_async().await;
    upload.assert_async().await;
  }

  #[tokio::test]
  async fn silent_server_hits_client_timeout() {
    // 只监听不应答
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let endpoint = HttpAnalysisEndpoint::new(
      Url::parse(&format!("http://{address}/analyze")).unwrap(),
      Duration::from_millis(200),
    )
    .unwrap();
    let error = endpoint
      .analyze(&Url::parse("https://cdn.test/frame-1.jpg").unwrap())
      .await
      .unwrap_err();
    assert!(matches!(error, RemoteError::Http(ref e) if e.is_timeout()));
    drop(listener);
  }
}
