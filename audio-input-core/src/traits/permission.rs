/// Access to the OS microphone permission.
pub trait PermissionProvider: Send + Sync {
    /// Current grant status. Must not prompt the user.
    fn has_permission(&self) -> bool;

    /// Ask the user for permission. Returns immediately; the host reports the
    /// decision later through `CaptureSession::on_permission_result`.
    fn request_permission(&self);
}
