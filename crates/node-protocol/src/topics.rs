//! Reserved topics consumed by the client node core.

/// Request/reply services reachable over the control channel.
pub mod services {
    pub const SERVER_CONFIG: &str = "/services/server_configuration";
    pub const CLIENT_REGISTRATION: &str = "/services/client/registration";
    pub const CLIENT_DEREGISTRATION: &str = "/services/client/deregistration";
    pub const DEVICE_REGISTRATION: &str = "/services/device/registration";
    pub const DEVICE_DEREGISTRATION: &str = "/services/device/deregistration";
    pub const SESSION_REGISTRATION: &str = "/services/session/registration";
    pub const TOPIC_SUBSCRIPTION: &str = "/services/topic_subscription";
    pub const COMPONENT_LIST: &str = "/services/component/get_list";
}

/// Informational topics published by the master node on the data channel.
pub mod info {
    /// Carries a [`ComponentList`](crate::ComponentList) (or a single
    /// profile) whenever new components become available.
    pub const NEW_COMPONENTS: &str = "/info/component/new";
}
