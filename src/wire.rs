//! TCP 后端的帧格式
//!
//! 每帧为 4 字节大端长度加 UTF-8 正文，正文字段以制表符分隔。

use crate::config::Consistency;
use crate::error::{AppError, Result};

/// 单帧正文上限
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const SEP: char = '\t';

/// 请求
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Put { key: String, value: String },
    Get { key: String, consistency: Consistency },
    DeleteRange { prefix: String },
}

/// 响应
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    Ok,
    Value(String),
    NotFound,
    Deleted(u64),
    Error(String),
}

fn check_field(field: &str) -> Result<()> {
    if field.contains(SEP) || field.contains('\n') {
        return Err(AppError::Protocol(format!("field contains separator: {field:?}")));
    }
    Ok(())
}

impl Request {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match self {
            Request::Put { key, value } => {
                check_field(key)?;
                check_field(value)?;
                format!("PUT{SEP}{key}{SEP}{value}")
            }
            Request::Get { key, consistency } => {
                check_field(key)?;
                format!("GET{SEP}{key}{SEP}{}", consistency.flag())
            }
            Request::DeleteRange { prefix } => {
                check_field(prefix)?;
                format!("DELRANGE{SEP}{prefix}")
            }
        };
        frame(body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let text = utf8(body)?;
        let fields: Vec<&str> = text.split(SEP).collect();
        match fields.as_slice() {
            ["PUT", key, value] => Ok(Request::Put {
                key: key.to_string(),
                value: value.to_string(),
            }),
            ["GET", key, flag] => Ok(Request::Get {
                key: key.to_string(),
                consistency: flag
                    .parse()
                    .map_err(|_| AppError::Protocol(format!("bad consistency {flag:?}")))?,
            }),
            ["DELRANGE", prefix] => Ok(Request::DeleteRange {
                prefix: prefix.to_string(),
            }),
            _ => Err(AppError::Protocol(format!("malformed request {text:?}"))),
        }
    }
}

impl Response {
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = match self {
            Response::Ok => "OK".to_string(),
            Response::Value(v) => format!("VAL{SEP}{v}"),
            Response::NotFound => "NONE".to_string(),
            Response::Deleted(n) => format!("DELETED{SEP}{n}"),
            // 错误消息里的分隔符替换掉，保证帧可解析
            Response::Error(msg) => format!("ERR{SEP}{}", msg.replace([SEP, '\n'], " ")),
        };
        frame(body)
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        let text = utf8(body)?;
        let (head, rest) = match text.split_once(SEP) {
            Some((head, rest)) => (head, Some(rest)),
            None => (text, None),
        };
        match (head, rest) {
            ("OK", None) => Ok(Response::Ok),
            ("NONE", None) => Ok(Response::NotFound),
            ("VAL", Some(v)) => Ok(Response::Value(v.to_string())),
            ("DELETED", Some(n)) => n
                .parse()
                .map(Response::Deleted)
                .map_err(|_| AppError::Protocol(format!("bad delete count {n:?}"))),
            ("ERR", Some(msg)) => Ok(Response::Error(msg.to_string())),
            _ => Err(AppError::Protocol(format!("malformed response {text:?}"))),
        }
    }
}

fn utf8(body: &[u8]) -> Result<&str> {
    std::str::from_utf8(body).map_err(|e| AppError::Protocol(e.to_string()))
}

fn frame(body: String) -> Result<Vec<u8>> {
    let len = body.len();
    if len > MAX_FRAME_LEN {
        return Err(AppError::Protocol(format!("frame too large: {len} bytes")));
    }
    let mut out = Vec::with_capacity(4 + len);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.extend_from_slice(body.as_bytes());
    Ok(out)
}

/// 解析帧头，返回正文长度
pub fn frame_len(header: [u8; 4]) -> Result<usize> {
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(AppError::Protocol(format!("frame too large: {len} bytes")));
    }
    Ok(len)
}
