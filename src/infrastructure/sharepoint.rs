//! SharePoint publication sink.
//!
//! Uses the user-credential STS sign-in flow: a security token is requested
//! from the Microsoft login endpoint, exchanged for site auth cookies, and
//! the REST API is then driven with those cookies plus a form digest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use url::Url;

use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::SharePointConfig;

const STS_URL: &str = "https://login.microsoftonline.com/extSTS.srf";
const ODATA_JSON: &str = "application/json;odata=verbose";

static SECURITY_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<wsse:BinarySecurityToken[^>]*>([^<]+)</wsse:BinarySecurityToken>").unwrap()
});

/// Durable store receiving cleaned files.
#[async_trait]
pub trait PublicationSink: Send + Sync {
    async fn upload(&self, local_path: &Path, destination_name: &str) -> Result<()>;

    /// Filenames in the destination folder with their last-modified times.
    async fn list_with_modified_time(&self) -> Result<BTreeMap<String, DateTime<Utc>>>;
}

pub struct SharePointClient {
    http: reqwest::Client,
    config: SharePointConfig,
}

impl SharePointClient {
    pub fn new(config: SharePointConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| AppError::Transfer(format!("failed to build http client: {}", e)))?;
        Ok(Self { http, config })
    }

    async fn sign_in(&self) -> Result<()> {
        info!("Authenticating to SharePoint");
        let envelope = security_token_request(
            &self.config.site_url,
            &self.config.username,
            &self.config.password,
        );
        let response = self
            .http
            .post(STS_URL)
            .body(envelope)
            .send()
            .await
            .map_err(|e| AppError::Transfer(format!("token request failed: {}", e)))?;
        let body = response
            .text()
            .await
            .map_err(|e| AppError::Transfer(format!("token response unreadable: {}", e)))?;
        let token = extract_security_token(&body).ok_or_else(|| {
            AppError::Transfer("security token not granted, check sink credentials".to_string())
        })?;

        let signin_url = format!(
            "{}/_forms/default.aspx?wa=wsignin1.0",
            site_origin(&self.config.site_url)?
        );
        let response = self
            .http
            .post(&signin_url)
            .body(token)
            .send()
            .await
            .map_err(|e| AppError::Transfer(format!("sign-in request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Transfer(format!(
                "sign-in rejected ({})",
                response.status()
            )));
        }
        Ok(())
    }

    async fn request_digest(&self) -> Result<String> {
        let url = format!("{}/_api/contextinfo", self.config.site_url);
        let response = self
            .http
            .post(&url)
            .header("Accept", ODATA_JSON)
            .send()
            .await
            .map_err(|e| AppError::Transfer(format!("contextinfo request failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Transfer(format!(
                "contextinfo rejected ({})",
                response.status()
            )));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Transfer(format!("contextinfo unreadable: {}", e)))?;
        json["d"]["GetContextWebInformation"]["FormDigestValue"]
            .as_str()
            .map(|digest| digest.to_string())
            .ok_or_else(|| AppError::Transfer("no form digest in contextinfo".to_string()))
    }
}

#[async_trait]
impl PublicationSink for SharePointClient {
    async fn upload(&self, local_path: &Path, destination_name: &str) -> Result<()> {
        self.sign_in().await?;
        let digest = self.request_digest().await?;
        let content = tokio::fs::read(local_path)
            .await
            .map_err(|e| AppError::Io(format!("failed to read {}: {}", local_path.display(), e)))?;

        let url = format!(
            "{}/_api/web/GetFolderByServerRelativeUrl('{}')/Files/add(url='{}',overwrite=true)",
            self.config.site_url, self.config.folder_url, destination_name
        );
        info!("Uploading {}", destination_name);
        let response = self
            .http
            .post(&url)
            .header("Accept", ODATA_JSON)
            .header("X-RequestDigest", digest)
            .body(content)
            .send()
            .await
            .map_err(|e| AppError::Transfer(format!("upload request failed: {}", e)))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::Transfer(format!(
                "upload of {} failed ({}): {}",
                destination_name, status, text
            )));
        }
        Ok(())
    }

    async fn list_with_modified_time(&self) -> Result<BTreeMap<String, DateTime<Utc>>> {
        self.sign_in().await?;
        let url = format!(
            "{}/_api/web/GetFolderByServerRelativeUrl('{}')/Files?$select=Name,TimeLastModified",
            self.config.site_url, self.config.folder_url
        );
        let response = self
            .http
            .get(&url)
            .header("Accept", ODATA_JSON)
            .send()
            .await
            .map_err(|e| AppError::Transfer(format!("folder listing failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(AppError::Transfer(format!(
                "folder listing rejected ({})",
                response.status()
            )));
        }
        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::Transfer(format!("folder listing unreadable: {}", e)))?;
        let results = json["d"]["results"]
            .as_array()
            .ok_or_else(|| AppError::Transfer("unexpected folder listing shape".to_string()))?;

        let mut files = BTreeMap::new();
        for entry in results {
            let (Some(name), Some(modified)) =
                (entry["Name"].as_str(), entry["TimeLastModified"].as_str())
            else {
                continue;
            };
            let timestamp = DateTime::parse_from_rfc3339(modified)
                .map_err(|e| AppError::Parse(format!("bad modified time for {}: {}", name, e)))?
                .with_timezone(&Utc);
            files.insert(name.to_string(), timestamp);
        }
        Ok(files)
    }
}

fn site_origin(site_url: &str) -> Result<String> {
    let parsed = Url::parse(site_url)
        .map_err(|e| AppError::Transfer(format!("invalid site url {}: {}", site_url, e)))?;
    Ok(format!(
        "{}://{}",
        parsed.scheme(),
        parsed.host_str().unwrap_or_default()
    ))
}

fn security_token_request(site_url: &str, username: &str, password: &str) -> String {
    format!(
        r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope"
            xmlns:a="http://www.w3.org/2005/08/addressing"
            xmlns:u="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-utility-1.0.xsd">
  <s:Header>
    <a:Action s:mustUnderstand="1">http://schemas.xmlsoap.org/ws/2005/02/trust/RST/Issue</a:Action>
    <a:ReplyTo><a:Address>http://www.w3.org/2005/08/addressing/anonymous</a:Address></a:ReplyTo>
    <a:To s:mustUnderstand="1">https://login.microsoftonline.com/extSTS.srf</a:To>
    <o:Security s:mustUnderstand="1" xmlns:o="http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd">
      <o:UsernameToken>
        <o:Username>{}</o:Username>
        <o:Password>{}</o:Password>
      </o:UsernameToken>
    </o:Security>
  </s:Header>
  <s:Body>
    <t:RequestSecurityToken xmlns:t="http://schemas.xmlsoap.org/ws/2005/02/trust">
      <wsp:AppliesTo xmlns:wsp="http://schemas.xmlsoap.org/ws/2004/09/policy">
        <a:EndpointReference><a:Address>{}</a:Address></a:EndpointReference>
      </wsp:AppliesTo>
      <t:KeyType>http://schemas.xmlsoap.org/ws/2005/05/identity/NoProofKey</t:KeyType>
      <t:RequestType>http://schemas.xmlsoap.org/ws/2005/02/trust/Issue</t:RequestType>
      <t:TokenType>urn:oasis:names:tc:SAML:1.0:assertion</t:TokenType>
    </t:RequestSecurityToken>
  </s:Body>
</s:Envelope>"#,
        xml_escape(username),
        xml_escape(password),
        xml_escape(site_url)
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn extract_security_token(body: &str) -> Option<String> {
    SECURITY_TOKEN
        .captures(body)
        .map(|captures| captures[1].to_string())
}
