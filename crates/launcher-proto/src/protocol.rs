use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    InitData, Keyset, LanguageInfo, LogEntry, PageRange, PageResult, Playlist, PlaylistEntry,
    Preferences, Record, RecordSummary, ServiceInfo, TagCategory, ViewQuery,
};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  The shell checks this on handshake and refuses to talk to an
/// incompatible back.
pub const PROTOCOL_VERSION: u32 = 1;

/// Largest frame body either side will accept.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

pub type RequestId = u64;

/// Messages sent from the shell to the back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "req")]
pub enum Request {
    /// Handshake; answered with `Response::Init`.
    Init,
    /// Page boundaries for `query`, one cursor per `page_size` rows.
    GetKeyset {
        query: ViewQuery,
        page_size: u32,
    },
    GetPages {
        library: String,
        query: ViewQuery,
        ranges: Vec<PageRange>,
    },
    GetRandomRecords {
        count: usize,
        broken: bool,
        extreme: bool,
        excluded_libraries: Vec<String>,
    },
    SaveRecord {
        record: Record,
    },
    DeleteRecord {
        id: String,
    },
    SavePlaylistEntry {
        entry: PlaylistEntry,
    },
    SavePlaylist {
        playlist: Playlist,
    },
    DeletePlaylist {
        id: String,
    },
    /// Ask the back to restart the application (after an upgrade).
    Restart,
}

/// Answers to `Request`s, always correlated by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "res")]
pub enum Response {
    Init {
        data: InitData,
    },
    Keyset {
        #[serde(with = "crate::model::keyset_wire")]
        keyset: Keyset,
        total: u64,
    },
    Pages {
        ranges: Vec<PageResult>,
    },
    RandomRecords {
        records: Vec<RecordSummary>,
    },
    Playlist {
        playlist: Option<Playlist>,
    },
    Ack,
    /// Success without a payload.  Callers expecting data treat it as a no-op.
    Empty,
    Error {
        message: String,
    },
}

/// Unsolicited events sent from the back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "push")]
pub enum PushEvent {
    LogEntryAdded {
        entry: LogEntry,
    },
    LocaleChanged {
        locale: String,
    },
    ThemeChanged {
        theme: String,
    },
    LanguageListChanged {
        languages: Vec<LanguageInfo>,
    },
    PlaylistsChanged {
        playlists: Vec<Playlist>,
    },
    TagCategoriesChanged {
        categories: Vec<TagCategory>,
    },
    ServiceChanged {
        service: ServiceInfo,
    },
    ServiceRemoved {
        id: String,
    },
    PreferencesChanged {
        preferences: Preferences,
    },
    /// Any push type this build doesn't know about.
    #[serde(other)]
    Unknown,
}

/// Wrapper for socket communication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind")]
pub enum Envelope {
    /// `id` is `None` for fire-and-forget sends.
    Request {
        id: Option<RequestId>,
        request: Request,
    },
    Response {
        id: RequestId,
        response: Response,
    },
    Push {
        event: PushEvent,
    },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {0} bytes exceeds limit")]
    TooLarge(usize),
    #[error("malformed frame body: {0}")]
    Json(#[from] serde_json::Error),
}

impl Envelope {
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(json.len()));
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decode one frame from the front of `data`.
    ///
    /// `Ok(None)` means more bytes are needed.  On `Err(FrameError::Json)` the
    /// caller should still drop the frame; `frame_len` tells it how much.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, FrameError> {
        let Some(len) = Self::frame_len(data)? else {
            return Ok(None);
        };
        let body = &data[4..len];
        let envelope: Self = serde_json::from_slice(body)?;
        Ok(Some((envelope, len)))
    }

    /// Correlation id of a complete `Response` frame whose body failed to
    /// decode as an `Envelope`, so its caller can be failed instead of left
    /// waiting.
    pub fn response_id(frame: &[u8]) -> Option<RequestId> {
        let body = frame.get(4..)?;
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        if value.get("kind")?.as_str()? != "Response" {
            return None;
        }
        value.get("id")?.as_u64()
    }

    /// Total length (header included) of the frame at the front of `data`,
    /// or `None` if it hasn't fully arrived.
    pub fn frame_len(data: &[u8]) -> Result<Option<usize>, FrameError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        Ok(Some(4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Cursor;

    #[test]
    fn test_envelope_encode_decode() {
        let env = Envelope::Request {
            id: Some(7),
            request: Request::DeleteRecord { id: "g1".into() },
        };
        let encoded = env.encode().unwrap();
        let (decoded, len) = Envelope::decode(&encoded).unwrap().unwrap();
        assert_eq!(len, encoded.len());
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let env = Envelope::Response {
            id: 1,
            response: Response::Ack,
        };
        let encoded = env.encode().unwrap();
        assert!(Envelope::decode(&encoded[..3]).unwrap().is_none());
        assert!(Envelope::decode(&encoded[..encoded.len() - 1])
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_two_frames_back_to_back() {
        let mut buf = Envelope::Push {
            event: PushEvent::ThemeChanged {
                theme: "dark".into(),
            },
        }
        .encode()
        .unwrap();
        let first_len = buf.len();
        buf.extend(
            Envelope::Response {
                id: 2,
                response: Response::Empty,
            }
            .encode()
            .unwrap(),
        );
        let (_, consumed) = Envelope::decode(&buf).unwrap().unwrap();
        assert_eq!(consumed, first_len);
        let (second, _) = Envelope::decode(&buf[consumed..]).unwrap().unwrap();
        assert!(matches!(second, Envelope::Response { id: 2, .. }));
    }

    #[test]
    fn test_oversized_header_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_be_bytes();
        assert!(matches!(
            Envelope::decode(&header),
            Err(FrameError::TooLarge(_))
        ));
    }

    #[test]
    fn test_unknown_push_type_decodes_as_unknown() {
        let json = r#"{"kind":"Push","event":{"push":"CurationStateChanged","folder":"x"}}"#;
        let env: Envelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            env,
            Envelope::Push {
                event: PushEvent::Unknown
            }
        );
    }

    #[test]
    fn test_keyset_response_wire_shape() {
        let mut keyset = Keyset::new();
        keyset.insert(1, Cursor::from("cursorA"));
        keyset.insert(2, Cursor::from("cursorB"));
        let env = Envelope::Response {
            id: 3,
            response: Response::Keyset { keyset, total: 40 },
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["response"]["res"], "Keyset");
        assert_eq!(value["response"]["keyset"]["2"], "cursorB");
        assert_eq!(value["response"]["total"], 40);
    }

    #[test]
    fn test_keyset_response_decodes_from_frame() {
        let keyset: Keyset = [(1, Cursor::from("cursorA")), (2, Cursor::from("cursorB"))]
            .into_iter()
            .collect();
        let env = Envelope::Response {
            id: 3,
            response: Response::Keyset { keyset, total: 40 },
        };
        let bytes = env.encode().unwrap();
        let (decoded, consumed) = Envelope::decode(&bytes).unwrap().unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_response_id_of_undecodable_frame() {
        let frame = |body: &str| {
            let mut f = (body.len() as u32).to_be_bytes().to_vec();
            f.extend_from_slice(body.as_bytes());
            f
        };
        let bad = frame(r#"{"kind":"Response","id":9,"response":{"res":"Pages","ranges":7}}"#);
        assert!(Envelope::decode(&bad).is_err());
        assert_eq!(Envelope::response_id(&bad), Some(9));

        let push = frame(r#"{"kind":"Push","id":9,"event":{}}"#);
        assert_eq!(Envelope::response_id(&push), None);
        assert_eq!(Envelope::response_id(&frame("not json")), None);
    }

    #[test]
    fn test_keyset_with_non_numeric_index_is_rejected() {
        let json = r#"{"kind":"Response","id":1,"response":{"res":"Keyset","keyset":{"one":"c"},"total":1}}"#;
        assert!(serde_json::from_str::<Envelope>(json).is_err());
    }
}
