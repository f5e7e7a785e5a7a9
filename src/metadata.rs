//! QUERY_INFO / SET_INFO exchange for file basic information.
//!
//! Each time slot of a [`BasicInfoPatch`] travels independently: a slot the
//! caller did not set is sent as the "do not update" value and nothing here
//! assumes how the server relates one timestamp to another. Whether setting
//! ChangeTime also moves LastWriteTime (or the reverse) is up to the server.
//! Nothing is cached; every query goes to the server.

use bytes::BytesMut;
use tracing::debug;

use crate::client::FileHandle;
use crate::error::{Error, Result};
use crate::fscc::{
    BasicInfoPatch, FileAllInformation, FileBasicInformation, FILE_BASIC_INFORMATION_SIZE,
};
use crate::smb2::query::{
    QueryInfoRequest, QueryInfoResponse, SetInfoRequest, SetInfoResponse, FILE_ALL_INFORMATION,
    FILE_BASIC_INFORMATION, SMB2_0_INFO_FILE,
};
use crate::smb2::{FileId, Smb2Command};

/// Output buffer offered for FileAllInformation: the fixed part plus a
/// generous name.
const FILE_ALL_INFORMATION_BUFFER: u32 = 4096;

/// QUERY_INFO for FileBasicInformation on `file_id`.
pub fn query_basic_request(file_id: FileId) -> QueryInfoRequest {
    QueryInfoRequest {
        info_type: SMB2_0_INFO_FILE,
        file_info_class: FILE_BASIC_INFORMATION,
        output_buffer_length: FILE_BASIC_INFORMATION_SIZE as u32,
        additional_information: 0,
        flags: 0,
        file_id,
    }
}

/// QUERY_INFO for FileAllInformation on `file_id`.
pub fn query_all_request(file_id: FileId) -> QueryInfoRequest {
    QueryInfoRequest {
        info_type: SMB2_0_INFO_FILE,
        file_info_class: FILE_ALL_INFORMATION,
        output_buffer_length: FILE_ALL_INFORMATION_BUFFER,
        additional_information: 0,
        flags: 0,
        file_id,
    }
}

/// Encode the SET_INFO body for `patch`. Fails with `InvalidArgument` for a
/// concrete tick-0 time, which the wire can't tell apart from "do not update".
pub fn set_basic_request_body(file_id: FileId, patch: &BasicInfoPatch) -> Result<BytesMut> {
    let info = patch.encode()?;
    let req = SetInfoRequest {
        info_type: SMB2_0_INFO_FILE,
        file_info_class: FILE_BASIC_INFORMATION,
        additional_information: 0,
        file_id,
        buffer: &info,
    };
    let mut body = BytesMut::with_capacity(32 + info.len());
    req.serialize(&mut body);
    Ok(body)
}

async fn query_info(handle: &FileHandle, req: QueryInfoRequest) -> Result<Vec<u8>> {
    let mut body = BytesMut::with_capacity(41);
    req.serialize(&mut body);
    let resp = handle
        .send(Smb2Command::QueryInfo, &body)
        .await?
        .expect_success(Smb2Command::QueryInfo, handle.path())?;
    let info = QueryInfoResponse::parse(&resp.body)
        .ok_or_else(|| Error::MalformedResponse("QUERY_INFO response".into()))?;
    Ok(info.data)
}

fn ensure_can_read_attributes(handle: &FileHandle) -> Result<()> {
    handle.ensure_usable()?;
    if !handle.access().can_read_attributes() {
        return Err(Error::AccessDenied(format!(
            "{}: handle was opened without read-attributes access",
            handle.path()
        )));
    }
    Ok(())
}

/// Fetch the four timestamps and the attributes of an open file.
pub async fn query_basic_information(handle: &FileHandle) -> Result<FileBasicInformation> {
    ensure_can_read_attributes(handle)?;
    let data = query_info(handle, query_basic_request(handle.file_id())).await?;
    let info = FileBasicInformation::decode(&data)?;
    debug!(
        path = %handle.path(),
        change_time = info.change_time.ticks(),
        last_write_time = info.last_write_time.ticks(),
        "Queried basic information"
    );
    Ok(info)
}

/// Apply `patch`. Slots left as `DontUpdate` are not touched by the request.
pub async fn set_basic_information(handle: &FileHandle, patch: &BasicInfoPatch) -> Result<()> {
    handle.ensure_usable()?;
    if !handle.access().can_write_attributes() {
        return Err(Error::AccessDenied(format!(
            "{}: handle was opened without write-attributes access",
            handle.path()
        )));
    }
    let body = set_basic_request_body(handle.file_id(), patch)?;

    let resp = handle
        .send(Smb2Command::SetInfo, &body)
        .await?
        .expect_success(Smb2Command::SetInfo, handle.path())?;
    SetInfoResponse::parse(&resp.body)
        .ok_or_else(|| Error::MalformedResponse("SET_INFO response".into()))?;
    debug!(path = %handle.path(), ?patch, "Set basic information");
    Ok(())
}

pub async fn query_all_information(handle: &FileHandle) -> Result<FileAllInformation> {
    ensure_can_read_attributes(handle)?;
    let data = query_info(handle, query_all_request(handle.file_id())).await?;
    FileAllInformation::decode(&data)
}
