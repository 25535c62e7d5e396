//! Fixed PowerShell templates for store operations
//!
//! Each template reads its inputs from `$Params` (see
//! `wsman::powershell::wrap_script`), including the store location.

pub const LIST_NAME: &str = "list-certificates";
pub const ADD_NAME: &str = "add-certificate";
pub const REMOVE_NAME: &str = "remove-certificate";

/// Emits a JSON array of `{Thumbprint, RawData, HasPrivateKey}`.
pub const LIST: &str = r#"
$store = New-Object System.Security.Cryptography.X509Certificates.X509Store($Params.StorePath, $Params.Location)
$store.Open('ReadOnly, OpenExistingOnly')
try {
    $rows = foreach ($cert in $store.Certificates) {
        [PSCustomObject]@{
            Thumbprint    = $cert.Thumbprint
            RawData       = [Convert]::ToBase64String($cert.RawData)
            HasPrivateKey = $cert.HasPrivateKey
        }
    }
    ConvertTo-Json -InputObject @($rows) -Compress -Depth 2
} finally {
    $store.Close()
}
"#;

/// Imports `$Params.Pfx` and emits the installed thumbprint.
pub const ADD: &str = r#"
$bytes = [Convert]::FromBase64String($Params.Pfx)
$flags = [System.Security.Cryptography.X509Certificates.X509KeyStorageFlags]'MachineKeySet, PersistKeySet, Exportable'
$cert = New-Object System.Security.Cryptography.X509Certificates.X509Certificate2
$cert.Import($bytes, [string]$Params.Password, $flags)
if (-not [string]::IsNullOrEmpty($Params.FriendlyName)) {
    $cert.FriendlyName = $Params.FriendlyName
}
$store = New-Object System.Security.Cryptography.X509Certificates.X509Store($Params.StorePath, $Params.Location)
$store.Open('ReadWrite, OpenExistingOnly')
try {
    $store.Add($cert)
} finally {
    $store.Close()
}
Write-Output $cert.Thumbprint
"#;

/// Removes the first certificate matching `$Params.Thumbprint`.
pub const REMOVE: &str = r#"
$store = New-Object System.Security.Cryptography.X509Certificates.X509Store($Params.StorePath, $Params.Location)
$store.Open('MaxAllowed, OpenExistingOnly')
try {
    $found = $store.Certificates.Find('FindByThumbprint', [string]$Params.Thumbprint, $false)
    if ($found.Count -gt 0) {
        $store.Remove($found[0])
    }
    ConvertTo-Json -InputObject @{ Removed = ($found.Count -gt 0); Matches = $found.Count } -Compress
} finally {
    $store.Close()
}
"#;
