//! Device-level radio control: the connect handshake (`DEVICE_QUERY`,
//! `APP_START`) and the settings/maintenance commands.

use std::sync::Arc;

use meshlink_encoding::creator::{self, AppStartCreator};
use meshlink_encoding::parser::Response;
use meshlink_encoding::types::MAX_FRAME_LEN;

use crate::config::Config;
use crate::entity::{BatteryAndStorage, DeviceInfo, SelfInfo};
use crate::mux::{RequestError, RequestMux};

pub struct RadioControl {
    mux: RequestMux,
    config: Arc<Config>,
}

impl RadioControl {
    pub fn new(mux: RequestMux, config: Arc<Config>) -> Self {
        RadioControl { mux, config }
    }

    /// First handshake step; tells the radio which protocol version the
    /// host speaks and fetches its firmware descriptors. This is the first
    /// write on a fresh connection, so it runs under the setup budget with
    /// pairing-window handling.
    pub async fn device_query(&self) -> Result<DeviceInfo, RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::device_query(&mut buf, self.config.protocol_version)?;
        match self.mux.request_with(frame, self.config.setup_timeout, true).await? {
            Response::DeviceInfo(info) => Ok(DeviceInfo::from_frame(&info)?),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// Second handshake step; declares the app and switches the radio into
    /// companion mode. Runs under the setup budget with pairing-window
    /// handling, because a first connection may stall on the OS pairing
    /// dialog.
    pub async fn app_start(&self) -> Result<SelfInfo, RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = {
            let mut creator = AppStartCreator::new(&mut buf[..])?;
            creator.set_app_ver(self.config.app_ver);
            creator.set_app_name(&self.config.app_name)?;
            creator.build().to_vec()
        };
        match self.mux.request_with(&frame, self.config.setup_timeout, true).await? {
            Response::SelfInfo(info) => Ok(SelfInfo::from_frame(&info)?),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn set_advert_name(&self, name: &str) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_advert_name(&mut buf, name)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn set_advert_latlon(&self, lat: i32, lon: i32) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_advert_latlon(&mut buf, lat, lon)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn set_radio_params(
        &self,
        freq_khz: u32,
        bw_hz: u32,
        spreading_factor: u8,
        coding_rate: u8,
    ) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame =
            creator::set_radio_params(&mut buf, freq_khz, bw_hz, spreading_factor, coding_rate)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn set_tx_power(&self, dbm: u8) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_tx_power(&mut buf, dbm)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn set_device_pin(&self, pin: u32) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_device_pin(&mut buf, pin)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn set_other_params(
        &self,
        manual_add_contacts: bool,
        telemetry_mode: u8,
        advert_loc_policy: u8,
    ) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_other_params(
            &mut buf,
            manual_add_contacts,
            telemetry_mode,
            advert_loc_policy,
        )?;
        self.mux.expect_ok(frame).await
    }

    /// Announce this node into the mesh, optionally flood-wide.
    pub async fn send_self_advert(&self, flood: bool) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::send_self_advert(&mut buf, flood)?;
        self.mux.expect_ok(frame).await
    }

    pub async fn battery_and_storage(&self) -> Result<BatteryAndStorage, RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::get_battery_and_storage(&mut buf)?;
        match self.mux.request(frame).await? {
            Response::BatteryAndStorage(info) => Ok(BatteryAndStorage {
                battery_millivolts: info.battery_millivolts(),
                storage_used_kb: info.storage_used_kb(),
                storage_total_kb: info.storage_total_kb(),
            }),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    /// The radio's clock, as a Unix epoch.
    pub async fn device_time(&self) -> Result<u32, RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::get_device_time(&mut buf)?;
        match self.mux.request(frame).await? {
            Response::CurrTime(time) => Ok(time.epoch_secs()),
            _ => Err(RequestError::UnexpectedResponse),
        }
    }

    pub async fn set_device_time(&self, epoch_secs: u32) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::set_device_time(&mut buf, epoch_secs)?;
        self.mux.expect_ok(frame).await
    }

    /// Reboot drops the connection; any response is ignored.
    pub async fn reboot(&self) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::reboot(&mut buf)?;
        self.mux.raw(frame).await?;
        Ok(())
    }

    /// Wipes the radio's stored identity and contacts. The radio reboots;
    /// any response is ignored.
    pub async fn factory_reset(&self) -> Result<(), RequestError> {
        let mut buf = [0u8; MAX_FRAME_LEN];
        let frame = creator::factory_reset(&mut buf)?;
        self.mux.raw(frame).await?;
        Ok(())
    }
}
