//! Hardware backend driving a PIV token through the Yubico toolchain.
//!
//! Object I/O and certificate retrieval go through `yubico-piv-tool`
//! addressed by reader name; the on-device ECDH goes through `pkcs11-tool`
//! (libykcs11) addressed by the token serial. Both names travel in one
//! [`DeviceHandle`], resolved by the caller before the store is opened.

use std::io::Write;
use std::process::{Command, Output, Stdio};

use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::{DecodePublicKey, EncodePublicKey};
use p256::PublicKey;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use fob_core::{KeySlot, ManagementKey, ObjectId, Pin};

use crate::{Device, DeviceError, DeviceHandle, PUBLIC_POINT_LEN, SHARED_SECRET_LEN};

const PIV_TOOL: &str = "yubico-piv-tool";
const PKCS11_TOOL: &str = "pkcs11-tool";
const PKCS11_MODULE: &str = "libykcs11.so";

/// A PIV token reached through the system toolchain.
pub struct PivDevice {
    handle: DeviceHandle,
    auth: Option<ManagementKey>,
}

impl PivDevice {
    /// Opens the device behind `handle`. No I/O happens until the first call.
    pub fn open(handle: DeviceHandle) -> Self {
        Self { handle, auth: None }
    }

    /// The handle this device was opened with.
    pub fn handle(&self) -> &DeviceHandle {
        &self.handle
    }

    fn run(&self, program: &str, args: &[&str], stdin: Option<&[u8]>) -> Result<Output, DeviceError> {
        debug!(program, ?args, "invoking PIV toolchain");
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| DeviceError::Transient(format!("failed to spawn {program}: {e}")))?;

        if let Some(bytes) = stdin {
            child
                .stdin
                .take()
                .ok_or_else(|| DeviceError::Transient("child stdin unavailable".into()))?
                .write_all(bytes)
                .map_err(|e| DeviceError::Transient(format!("failed to feed {program}: {e}")))?;
        }

        child
            .wait_with_output()
            .map_err(|e| DeviceError::Transient(format!("{program} did not finish: {e}")))
    }

    fn classify_failure(output: &Output) -> DeviceError {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("CKR_PIN_INCORRECT") || stderr.contains("wrong pin") {
            return DeviceError::PinRejected {
                retries: parse_retries(&stderr),
            };
        }
        if stderr.contains("authentication") || stderr.contains("management key") {
            return DeviceError::AuthFailed;
        }
        if stderr.contains("Failed to connect") || stderr.contains("no card") {
            return DeviceError::Disconnected;
        }
        DeviceError::Transient(stderr.trim().to_string())
    }
}

/// Pulls a "N retries left" style counter out of toolchain diagnostics.
fn parse_retries(stderr: &str) -> Option<u8> {
    let idx = stderr.find("retries")?;
    stderr[..idx]
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .next_back()
        .and_then(|s| s.parse().ok())
}

/// Maps a PIV key slot to the PKCS#11 key id used by libykcs11.
fn pkcs11_key_id(slot: KeySlot) -> Option<u8> {
    match slot.0 {
        0x9a => Some(0x01),
        0x9c => Some(0x02),
        0x9d => Some(0x03),
        0x9e => Some(0x04),
        // Retired key management slots 82..95 map to ids 05..18.
        0x82..=0x95 => Some(slot.0 - 0x82 + 0x05),
        _ => None,
    }
}

impl Device for PivDevice {
    fn read_object(&mut self, id: ObjectId) -> Result<Option<Vec<u8>>, DeviceError> {
        let id_arg = format!("{:#08x}", id.value());
        let output = self.run(
            PIV_TOOL,
            &[
                "--reader",
                self.handle.reader(),
                "--action",
                "read-object",
                "--format",
                "binary",
                "--id",
                &id_arg,
            ],
            None,
        )?;

        if output.status.success() {
            return Ok(Some(output.stdout));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("Failed fetching object") || stderr.contains("not found") {
            // Never-written objects read back as absent.
            return Ok(None);
        }
        Err(Self::classify_failure(&output))
    }

    fn auth_admin(&mut self, key: &ManagementKey) -> Result<(), DeviceError> {
        // The toolchain authenticates per invocation; remember the credential
        // and present it with every write.
        self.auth = Some(key.clone());
        Ok(())
    }

    fn write_object(&mut self, id: ObjectId, bytes: &[u8]) -> Result<(), DeviceError> {
        let auth = self.auth.clone().ok_or(DeviceError::AuthRequired)?;

        let id_arg = format!("{:#08x}", id.value());
        let mut args = vec![
            "--reader".to_string(),
            self.handle.reader().to_string(),
            "--action".to_string(),
            "write-object".to_string(),
            "--format".to_string(),
            "binary".to_string(),
            "--id".to_string(),
            id_arg,
        ];
        match &auth {
            ManagementKey::Key(_) => {
                let hex_key = auth.to_hex().ok_or(DeviceError::AuthRequired)?;
                args.push(format!("--key={hex_key}"));
            }
            ManagementKey::Protected(pin) => {
                args.push("--pin".to_string());
                args.push(pin.expose().to_string());
            }
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.run(PIV_TOOL, &arg_refs, Some(bytes))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(Self::classify_failure(&output))
        }
    }

    fn public_key(&mut self, slot: KeySlot) -> Result<[u8; PUBLIC_POINT_LEN], DeviceError> {
        let slot_arg = format!("{:02x}", slot.0);
        let cert = self.run(
            PIV_TOOL,
            &[
                "--reader",
                self.handle.reader(),
                "--slot",
                &slot_arg,
                "--action",
                "read-certificate",
            ],
            None,
        )?;
        if !cert.status.success() {
            warn!(%slot, "no certificate in slot");
            return Err(DeviceError::KeyMissing(slot));
        }

        // Extract the SPKI from the certificate; the store only needs the
        // public point, not the certificate itself.
        let extracted = self.run("openssl", &["x509", "-pubkey", "-noout"], Some(&cert.stdout))?;
        if !extracted.status.success() {
            return Err(DeviceError::Malformed(
                "slot certificate did not parse".into(),
            ));
        }

        let pem = String::from_utf8_lossy(&extracted.stdout);
        let key = PublicKey::from_public_key_pem(&pem)
            .map_err(|_| DeviceError::KeyMissing(slot))?;
        let point = key.to_encoded_point(false);

        let mut out = [0u8; PUBLIC_POINT_LEN];
        out.copy_from_slice(point.as_bytes());
        Ok(out)
    }

    fn ecdh(
        &mut self,
        slot: KeySlot,
        peer: &[u8; PUBLIC_POINT_LEN],
        pin: &Pin,
    ) -> Result<[u8; SHARED_SECRET_LEN], DeviceError> {
        let key_id = pkcs11_key_id(slot).ok_or(DeviceError::KeyMissing(slot))?;

        // libykcs11 wants the peer key as DER SPKI in a file.
        let peer_key = PublicKey::from_sec1_bytes(peer)
            .map_err(|_| DeviceError::Malformed("peer point is not on P-256".into()))?;
        let spki = peer_key
            .to_public_key_der()
            .map_err(|e| DeviceError::Malformed(format!("SPKI encoding failed: {e}")))?;

        let mut peer_file = NamedTempFile::new()
            .map_err(|e| DeviceError::Transient(format!("temp file: {e}")))?;
        peer_file
            .write_all(spki.as_bytes())
            .map_err(|e| DeviceError::Transient(format!("temp file: {e}")))?;
        let secret_file = NamedTempFile::new()
            .map_err(|e| DeviceError::Transient(format!("temp file: {e}")))?;

        // Select the token by serial, not by reader: the PKCS#11 layer
        // enumerates tokens in its own order.
        let token_label = format!("YubiKey PIV #{}", self.handle.serial());
        let id_arg = format!("{key_id:02x}");
        let peer_path = peer_file.path().to_string_lossy().to_string();
        let secret_path = secret_file.path().to_string_lossy().to_string();

        let output = self.run(
            PKCS11_TOOL,
            &[
                "--module",
                PKCS11_MODULE,
                "--token-label",
                &token_label,
                "-l",
                "--pin",
                pin.expose(),
                "--derive",
                "-m",
                "ECDH1-DERIVE",
                "--id",
                &id_arg,
                "-i",
                &peer_path,
                "-o",
                &secret_path,
            ],
            None,
        )?;
        if !output.status.success() {
            return Err(Self::classify_failure(&output));
        }

        let shared = std::fs::read(secret_file.path())
            .map_err(|e| DeviceError::Transient(format!("shared secret readback: {e}")))?;
        if shared.len() != SHARED_SECRET_LEN {
            return Err(DeviceError::Malformed(format!(
                "ECDH returned {} bytes",
                shared.len()
            )));
        }

        let mut out = [0u8; SHARED_SECRET_LEN];
        out.copy_from_slice(&shared);
        Ok(out)
    }
}
