// Certificate store orchestrator constants

/// Store type name registered with the scheduler
pub const STORE_TYPE_NAME: &str = "WinCerMgmt";

/// Agent name sent in the User-Agent header
pub const AGENT_NAME: &str = "certstore-rs";

/// Agent version string
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default WinRM HTTP listener port
pub const WINRM_HTTP_PORT: u16 = 5985;

/// Path of the WS-Management endpoint on the listener
pub const WSMAN_PATH: &str = "wsman";

/// Service class used when composing the SPN for the WinRM listener
pub const SPN_SERVICE_CLASS: &str = "HTTP";

/// Store location every operation targets
pub const STORE_LOCATION: &str = "LocalMachine";

/// Maximum SOAP envelope size advertised to the listener
pub const MAX_ENVELOPE_SIZE: u32 = 153_600;

/// WS-Management operation timeout for shell requests (Receive long-polls this long)
pub const OPERATION_TIMEOUT: &str = "PT60S";

/// UTF-8 code page for the remote shell
pub const SHELL_CODEPAGE: u32 = 65001;

/// Largest stdin chunk sent in a single Send request
pub const STDIN_CHUNK_SIZE: usize = 64 * 1024;

/// Message returned for operation kinds this store type does not implement
pub const INVALID_MANAGEMENT_OPERATION: &str = "Invalid Management Operation";

/// Job classes the scheduler dispatches to this store type
pub mod job_types {
    pub const INVENTORY: &str = "Inventory";
    pub const MANAGEMENT: &str = "Management";
}

/// Management operation names as sent by the scheduler
pub mod operation_types {
    pub const ADD: &str = "Add";
    pub const REMOVE: &str = "Remove";
}
