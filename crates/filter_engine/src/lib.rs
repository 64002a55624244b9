//! Filter engine: page model, classification pipeline and effect execution.
mod api;
mod api_config;
mod background;
mod classify;
mod codec;
mod decode;
mod extract;
mod messages;
mod monitor;
mod notice;
mod page;
mod persist;
mod storage;
mod transport;
mod types;
mod visual;

pub use api::{
    ChatMessage, ChatRequest, ChatResponse, Choice, ContentPart, ImageUrl, MessageContent,
    QuotaErrorBody, ResponseMessage, Usage,
};
pub use api_config::{
    ApiConfig, ConfigResolver, Endpoints, StoreConfigResolver, DEFAULT_MODEL, OPENROUTER_API_URL,
    PROXY_URL,
};
pub use background::{Background, BackgroundHandle, TabId, TabPhase, TabPort};
pub use classify::{BatchCoordinator, ClassifierSettings, DispatchMode};
pub use codec::{
    batch_content, decode_decisions, find_ordinal_line, recommendation_prompt, response_lines,
    LineDecision, NO_RESPONSE,
};
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use extract::{Grouping, Platform, SelectorExtractor, SiteExtractor, SiteProfile};
pub use messages::{
    BackgroundRequest, BackgroundResponse, BatchReply, ErrorPayload, FailedChunk, PageRequest,
    PageResponse, RecommendationReply, TitleOnly,
};
pub use monitor::{ClassificationPort, ContentMonitor};
pub use notice::{render_quota_notice, NOTICE_DISPLAY};
pub use page::{ElementHandle, NoticeId, PageDocument};
pub use persist::{ensure_state_dir, AtomicFileWriter, PersistError};
pub use storage::{keys, KeyValueStore, MemoryStore, StorageError, StoredSettings};
pub use transport::{ChatTransport, ReqwestTransport, TransportSettings};
pub use types::{
    BatchItem, BatchOutcome, ChunkFailure, ClassifyError, ErrorKind, ExtractedItem, ItemDecision,
    MessagingError, QuotaDetails,
};
pub use visual::{VisualEffects, VisualStateMachine, STATE_ATTR};
