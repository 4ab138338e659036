mod auth;
mod config;
mod coordinator;
mod diff;
mod entities;
mod error;
mod logger;
mod normalize;
mod protocol;
mod service;
mod session;
mod types;

pub use auth::{AuthStrategy, CredentialLogin, CredentialLoginBuilder};
pub use config::{
    validate_account, validation_error_key, AccountConfig, AccountInfo, BridgeConfig,
    BridgeOptions,
};
pub use coordinator::{
    AccountHandle, Command, Coordinator, CoordinatorBuilder, FailureState, LogNotifier,
    Notification, Notifier, UpdateState, DEFAULT_SCAN_INTERVAL, FAILURE_NOTIFY_THRESHOLD,
    COOKIE_EXPIRED_NOTIFICATION_ID,
};
pub use entities::{
    setup_entities, Climate, DeviceInfo, Entities, ForcedHotWaterSwitch, SensorKind,
    TankTargetNumber, TemperatureSensor, Zone1ModeSelect,
};
pub use error::{Error, Result};
pub use logger::MessageLogMode;
pub use normalize::normalize;
pub use service::{
    call_service, parse_service_call, SERVICES, SERVICE_SET_FORCED_HOT_WATER,
    SERVICE_SET_OPERATION_MODE_ZONE1, SERVICE_SET_TANK_WATER_TEMPERATURE,
};
pub use session::{SessionClient, SessionClientBuilder, DEFAULT_REQUEST_TIMEOUT};
pub use types::*;
