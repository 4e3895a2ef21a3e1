use rsa::pkcs8::DecodePublicKey;
use rsa::{Oaep, RsaPublicKey};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use bilireply_core::domain::comments::Comment;
use bilireply_core::domain::video::VideoRecord;
use bilireply_core::types::video_id::Bvid;

use super::error::RequestError;
use super::executor::{PlatformRequest, PlatformResponse, RequestExecutor};

/// Page size of the creator's video listing.
pub const VIDEO_PAGE_SIZE: u32 = 30;
const REPLY_TYPE_VIDEO: u8 = 1;
/// Newest comments first.
const SORT_BY_TIME: u8 = 2;
const REFRESH_CSRF_SELECTOR: &str = "div[id=\"1-name\"]";
/// Key the web client uses to encrypt the correspond path.
const REFRESH_PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----
MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQKBgQDLgd2OAkcGVtoE3ThUREbio0Eg
Uc/prcajMKXvkCKFCWhJYJcLkcM2DKKcSeFpD/j6Boy538YXnR6VhcuUJOhH2x71
nzPjfdTcqMz7djHum0qSZA0AyCBDABUqCrfNgCiJ00Ra7GmRj+YCK1NJEuewlb40
JNrRuoEUXpabUzGB8QIDAQAB
-----END PUBLIC KEY-----";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("missing data: {0}")]
    MissingData(&'static str),
    #[error("unexpected payload: {0}")]
    Payload(String),
    #[error("correspond path encryption failed: {0}")]
    Encrypt(String),
}

impl ApiError {
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, ApiError::Request(err) if err.is_credential_rejected())
    }

    pub fn platform_code(&self) -> Option<i64> {
        match self {
            ApiError::Request(err) => err.platform_code(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub passport_base: String,
    pub www_base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.bilibili.com".to_string(),
            passport_base: "https://passport.bilibili.com".to_string(),
            www_base: "https://www.bilibili.com".to_string(),
        }
    }
}

impl Endpoints {
    /// Every surface served from one origin; used against local mocks.
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api_base: base.clone(),
            passport_base: base.clone(),
            www_base: base,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommentPage {
    pub comments: Vec<Comment>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

impl CommentPage {
    pub fn has_more(&self) -> bool {
        !self.comments.is_empty() && u64::from(self.page) * u64::from(self.page_size) < self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CookieStatus {
    pub refresh: bool,
    /// Milliseconds, as reported by the platform.
    pub timestamp: i64,
}

#[derive(Debug, Clone)]
pub struct CookieExchange {
    pub set_cookies: Vec<String>,
    pub refresh_token: Option<String>,
}

/// Typed calls against the platform, all routed through one executor.
pub struct PlatformClient {
    executor: RequestExecutor,
    endpoints: Endpoints,
    credential: String,
    refresh_key: Option<RsaPublicKey>,
}

impl PlatformClient {
    pub fn new(executor: RequestExecutor, endpoints: Endpoints, credential: impl Into<String>) -> Self {
        Self {
            executor,
            endpoints,
            credential: credential.into(),
            refresh_key: None,
        }
    }

    /// Overrides the platform key used for the correspond path.
    pub fn with_refresh_key(mut self, key: RsaPublicKey) -> Self {
        self.refresh_key = Some(key);
        self
    }

    pub fn set_credential(&mut self, credential: impl Into<String>) {
        self.credential = credential.into();
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut RequestExecutor {
        &mut self.executor
    }

    pub async fn list_videos(&mut self, uid: u64) -> Result<Vec<VideoRecord>, ApiError> {
        let request = PlatformRequest::get(format!("{}/x/space/arc/search", self.endpoints.api_base))
            .query("mid", uid)
            .query("ps", VIDEO_PAGE_SIZE)
            .query("pn", 1)
            .query("order", "pubdate")
            .no_cache();
        let data: VideoListData = self.call(request).await?;
        let vlist = data
            .list
            .ok_or(ApiError::MissingData("list"))?
            .vlist
            .unwrap_or_default();
        let mut videos = Vec::with_capacity(vlist.len());
        for item in vlist {
            match Bvid::try_from(item.bvid.as_str()) {
                Ok(id) => videos.push(VideoRecord {
                    id,
                    aid: item.aid,
                    title: item.title,
                    description: item.description,
                    author: item.author,
                    play_count: lenient_u64(&item.play),
                    comment_count: lenient_u64(&item.comment),
                }),
                Err(err) => debug!(bvid = %item.bvid, error = %err, "skipping listed video"),
            }
        }
        Ok(videos)
    }

    pub async fn resolve_aid(&mut self, bvid: &Bvid) -> Result<u64, ApiError> {
        let request = PlatformRequest::get(format!("{}/x/web-interface/view", self.endpoints.api_base))
            .query("bvid", bvid);
        let data: ViewData = self.call(request).await?;
        data.aid.ok_or(ApiError::MissingData("aid"))
    }

    pub async fn list_comments(
        &mut self,
        aid: u64,
        page: u32,
        page_size: u32,
    ) -> Result<CommentPage, ApiError> {
        let request = PlatformRequest::get(format!("{}/x/v2/reply", self.endpoints.api_base))
            .query("type", REPLY_TYPE_VIDEO)
            .query("oid", aid)
            .query("pn", page)
            .query("ps", page_size)
            .query("sort", SORT_BY_TIME);
        let data: ReplyListData = self.call(request).await?;
        let total = data.page.map(|page| page.count).unwrap_or_default();
        let comments = data
            .replies
            .unwrap_or_default()
            .into_iter()
            .filter_map(ReplyItem::into_comment)
            .collect();
        Ok(CommentPage {
            comments,
            total,
            page,
            page_size,
        })
    }

    pub async fn post_reply(
        &mut self,
        aid: u64,
        comment_id: &str,
        message: &str,
        csrf: &str,
    ) -> Result<(), ApiError> {
        let request = PlatformRequest::post(format!("{}/x/v2/reply/add", self.endpoints.api_base))
            .form("type", REPLY_TYPE_VIDEO)
            .form("oid", aid)
            .form("root", comment_id)
            .form("parent", comment_id)
            .form("message", message)
            .form("csrf", csrf);
        self.send(request).await?;
        Ok(())
    }

    pub async fn like_comment(&mut self, aid: u64, comment_id: &str, csrf: &str) -> Result<(), ApiError> {
        let request = PlatformRequest::post(format!("{}/x/v2/reply/action", self.endpoints.api_base))
            .form("type", REPLY_TYPE_VIDEO)
            .form("oid", aid)
            .form("rpid", comment_id)
            .form("action", 1)
            .form("csrf", csrf);
        self.send(request).await?;
        Ok(())
    }

    pub async fn cookie_info(&mut self, csrf: &str) -> Result<CookieStatus, ApiError> {
        let request = PlatformRequest::get(format!(
            "{}/x/passport-web/cookie/info",
            self.endpoints.passport_base
        ))
        .query("csrf", csrf)
        .no_cache();
        let data: CookieInfoData = self.call(request).await?;
        Ok(CookieStatus {
            refresh: data.refresh,
            timestamp: data.timestamp,
        })
    }

    /// Fetches the one-time refresh challenge embedded in the correspond page.
    pub async fn refresh_csrf(&mut self, timestamp: i64) -> Result<String, ApiError> {
        let path = match self.refresh_key.as_ref() {
            Some(key) => correspond_path(key, timestamp)?,
            None => correspond_path(&platform_refresh_key()?, timestamp)?,
        };
        let request = PlatformRequest::get(format!(
            "{}/correspond/1/{}",
            self.endpoints.www_base, path
        ))
        .no_cache()
        .text();
        let response = self.send(request).await?;
        let html = response
            .data
            .as_str()
            .ok_or(ApiError::MissingData("correspond page"))?;
        extract_refresh_csrf(html)
    }

    pub async fn exchange_cookie(
        &mut self,
        csrf: &str,
        refresh_csrf: &str,
        refresh_token: &str,
    ) -> Result<CookieExchange, ApiError> {
        let request = PlatformRequest::post(format!(
            "{}/x/passport-web/cookie/refresh",
            self.endpoints.passport_base
        ))
        .form("csrf", csrf)
        .form("refresh_csrf", refresh_csrf)
        .form("source", "main_web")
        .form("refresh_token", refresh_token);
        let response = self.send(request).await?;
        let data: ExchangeData = decode_data(response.data)?;
        if response.set_cookies.is_empty() {
            return Err(ApiError::MissingData("set-cookie"));
        }
        Ok(CookieExchange {
            set_cookies: response.set_cookies,
            refresh_token: data.refresh_token.filter(|token| !token.is_empty()),
        })
    }

    /// Invalidates the previous refresh token once the new credential works.
    pub async fn confirm_refresh(&mut self, csrf: &str, old_refresh_token: &str) -> Result<(), ApiError> {
        let request = PlatformRequest::post(format!(
            "{}/x/passport-web/confirm/refresh",
            self.endpoints.passport_base
        ))
        .form("csrf", csrf)
        .form("refresh_token", old_refresh_token);
        self.send(request).await?;
        Ok(())
    }

    async fn send(&mut self, request: PlatformRequest) -> Result<PlatformResponse, ApiError> {
        let request = request.cookie(&self.credential);
        Ok(self.executor.execute(&request).await?)
    }

    async fn call<T: DeserializeOwned>(&mut self, request: PlatformRequest) -> Result<T, ApiError> {
        let response = self.send(request).await?;
        decode_data(response.data)
    }
}

pub fn platform_refresh_key() -> Result<RsaPublicKey, ApiError> {
    RsaPublicKey::from_public_key_pem(REFRESH_PUBLIC_KEY_PEM)
        .map_err(|err| ApiError::Encrypt(format!("public key: {err}")))
}

/// Path segment of the correspond page for a refresh at `timestamp` (ms):
/// hex of the RSA-OAEP/SHA-256 ciphertext of `refresh_{timestamp}`.
pub fn correspond_path(key: &RsaPublicKey, timestamp: i64) -> Result<String, ApiError> {
    let message = format!("refresh_{timestamp}");
    let ciphertext = key
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), message.as_bytes())
        .map_err(|err| ApiError::Encrypt(err.to_string()))?;
    Ok(hex::encode(ciphertext))
}

pub fn extract_refresh_csrf(html: &str) -> Result<String, ApiError> {
    let selector = Selector::parse(REFRESH_CSRF_SELECTOR)
        .map_err(|err| ApiError::Payload(format!("selector: {err}")))?;
    let document = Html::parse_document(html);
    document
        .select(&selector)
        .next()
        .map(|node| node.text().collect::<String>().trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or(ApiError::MissingData("refresh csrf"))
}

fn decode_data<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    if data.is_null() {
        return Err(ApiError::MissingData("data"));
    }
    serde_json::from_value(data).map_err(|err| ApiError::Payload(err.to_string()))
}

/// Counters arrive as numbers, numeric strings or placeholders such as `--`.
fn lenient_u64(value: &Value) -> u64 {
    match value {
        Value::Number(number) => number.as_u64().unwrap_or_default(),
        Value::String(text) => text.trim().parse().unwrap_or_default(),
        _ => 0,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct VideoListData {
    list: Option<VideoListInner>,
}

#[derive(Debug, Deserialize)]
struct VideoListInner {
    vlist: Option<Vec<VideoItem>>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    bvid: String,
    #[serde(default)]
    aid: Option<u64>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    play: Value,
    #[serde(default)]
    comment: Value,
}

#[derive(Debug, Deserialize)]
struct ViewData {
    aid: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReplyListData {
    page: Option<ReplyPageInfo>,
    replies: Option<Vec<ReplyItem>>,
}

#[derive(Debug, Deserialize)]
struct ReplyPageInfo {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ReplyItem {
    rpid: Value,
    #[serde(default)]
    ctime: i64,
    content: ReplyContent,
    member: ReplyMember,
}

#[derive(Debug, Deserialize)]
struct ReplyContent {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ReplyMember {
    mid: Value,
    #[serde(default)]
    uname: String,
}

impl ReplyItem {
    fn into_comment(self) -> Option<Comment> {
        let id = id_string(&self.rpid)?;
        let author_id = id_string(&self.member.mid).unwrap_or_default();
        Some(Comment::new(
            id,
            self.content.message,
            self.member.uname,
            author_id,
            self.ctime,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CookieInfoData {
    #[serde(default)]
    refresh: bool,
    #[serde(default)]
    timestamp: i64,
}

#[derive(Debug, Deserialize)]
struct ExchangeData {
    #[serde(default)]
    refresh_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use rsa::traits::PublicKeyParts;
    use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
    use sha2::Sha256;
    use wiremock::matchers::{body_string_contains, header, method, path, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{
        ApiError, Endpoints, PlatformClient, correspond_path, extract_refresh_csrf,
        platform_refresh_key,
    };
    use crate::platform::clock::ManualClock;
    use crate::platform::executor::tests::test_executor;
    use bilireply_core::types::video_id::Bvid;

    fn client(server: &MockServer) -> PlatformClient {
        PlatformClient::new(
            test_executor(Arc::new(ManualClock::new())),
            Endpoints::single(&server.uri()),
            "SESSDATA=s; bili_jct=csrf1",
        )
    }

    #[tokio::test]
    async fn list_videos_maps_vlist() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/space/arc/search"))
            .and(query_param("mid", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"list": {"vlist": [
                    {"bvid": "BV1xx411c7mD", "aid": 170001, "title": "t", "author": "a",
                     "play": 1200, "comment": "--"},
                    {"bvid": "bogus", "title": "skip"}
                ]}}
            })))
            .mount(&server)
            .await;

        let videos = client(&server).list_videos(42).await.unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].id.as_str(), "BV1xx411c7mD");
        assert_eq!(videos[0].aid, Some(170001));
        assert_eq!(videos[0].play_count, 1200);
        assert_eq!(videos[0].comment_count, 0);
    }

    #[tokio::test]
    async fn list_comments_tolerates_null_replies_and_string_ids() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/v2/reply"))
            .and(query_param("pn", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"page": {"count": 45}, "replies": [
                    {"rpid": 9001, "ctime": 1700000000, "content": {"message": "hello"},
                     "member": {"mid": "77", "uname": "viewer"}}
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/x/v2/reply"))
            .and(query_param("pn", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"page": {"count": 45}, "replies": null}
            })))
            .mount(&server)
            .await;

        let mut client = client(&server);
        let first = client.list_comments(170001, 1, 20).await.unwrap();
        assert!(first.has_more());
        assert_eq!(first.comments[0].id, "9001");
        assert_eq!(first.comments[0].author_id, "77");
        let second = client.list_comments(170001, 2, 20).await.unwrap();
        assert!(second.comments.is_empty());
        assert!(!second.has_more());
    }

    #[tokio::test]
    async fn post_reply_sends_csrf_form_and_cookie() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/x/v2/reply/add"))
            .and(header("cookie", "SESSDATA=s; bili_jct=csrf1"))
            .and(body_string_contains("csrf=csrf1"))
            .and(body_string_contains("root=9001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .post_reply(170001, "9001", "thanks", "csrf1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolve_aid_reads_view_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/web-interface/view"))
            .and(query_param("bvid", "BV1xx411c7mD"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {"aid": 5}})),
            )
            .mount(&server)
            .await;

        let bvid = Bvid::try_from("BV1xx411c7mD").unwrap();
        assert_eq!(client(&server).resolve_aid(&bvid).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn closed_comment_section_surfaces_platform_code() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x/v2/reply"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"code": 12002, "message": "评论区已关闭"})),
            )
            .mount(&server)
            .await;

        let err = client(&server).list_comments(1, 1, 20).await.unwrap_err();
        assert_eq!(err.platform_code(), Some(12002));
        assert!(!err.is_credential_rejected());
    }

    #[test]
    fn refresh_csrf_is_read_from_page() {
        let html = r#"<html><body><div id="1-name">  abc123 </div></body></html>"#;
        assert_eq!(extract_refresh_csrf(html).unwrap(), "abc123");
        assert!(matches!(
            extract_refresh_csrf("<html></html>"),
            Err(ApiError::MissingData(_))
        ));
    }

    fn test_keypair() -> (RsaPrivateKey, RsaPublicKey) {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = RsaPublicKey::from(&private);
        (private, public)
    }

    #[test]
    fn correspond_path_decrypts_to_refresh_timestamp() {
        let (private, public) = test_keypair();
        let path = correspond_path(&public, 1700000000000).unwrap();
        let ciphertext = hex::decode(&path).unwrap();
        assert_eq!(ciphertext.len(), 128);
        let plain = private.decrypt(Oaep::new::<Sha256>(), &ciphertext).unwrap();
        assert_eq!(plain, b"refresh_1700000000000");

        let again = correspond_path(&public, 1700000000000).unwrap();
        assert_ne!(path, again);
    }

    #[test]
    fn platform_refresh_key_is_a_1024_bit_key() {
        assert_eq!(platform_refresh_key().unwrap().size(), 128);
    }

    #[tokio::test]
    async fn refresh_csrf_requests_encrypted_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex("^/correspond/1/[0-9a-f]{256}$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"<html><div id="1-name">rc-token</div></html>"#),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (_, public) = test_keypair();
        let mut client = client(&server).with_refresh_key(public);
        assert_eq!(client.refresh_csrf(1700000000000).await.unwrap(), "rc-token");
    }
}
