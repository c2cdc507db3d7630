//! Classification of CDC class requests.

use crate::line_coding::LINE_CODING_LEN;
use usb_device::control::{Recipient, Request, RequestType};
use usb_device::UsbDirection;

pub const REQ_SET_LINE_CODING: u8 = 0x20;
pub const REQ_GET_LINE_CODING: u8 = 0x21;
pub const REQ_SET_CONTROL_LINE_STATE: u8 = 0x22;

/// How a setup packet was handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetupOutcome {
    /// The request was accepted and its data stage (if any) queued.
    Handled,

    /// The request was meant for this function but can't be served. The stack should stall the
    /// control transfer.
    Rejected,

    /// The request is not a CDC request for this function. The stack applies its default
    /// handling.
    NotMine,
}

/// A CDC request that passed the field checks for the control interface.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ClassRequest {
    GetLineCoding,
    SetLineCoding,
    SetControlLineState,
}

/// Matches `req` against the class requests this function serves. Requests that don't match
/// every field exactly are not ours; nothing here ever rejects.
pub(crate) fn classify(req: &Request, control_interface: u8) -> Option<ClassRequest> {
    if req.request_type != RequestType::Class || req.recipient != Recipient::Interface {
        return None;
    }

    let iface = u16::from(control_interface);
    let record_len = LINE_CODING_LEN as u16;

    match req.request {
        REQ_GET_LINE_CODING
            if req.value == 0
                && req.index == iface
                && req.length == record_len
                && req.direction == UsbDirection::In =>
        {
            Some(ClassRequest::GetLineCoding)
        }
        REQ_SET_LINE_CODING
            if req.value == 0
                && req.index == iface
                && req.length == record_len
                && req.direction == UsbDirection::Out =>
        {
            Some(ClassRequest::SetLineCoding)
        }
        REQ_SET_CONTROL_LINE_STATE if req.index == iface && req.length == 0 => {
            Some(ClassRequest::SetControlLineState)
        }
        _ => None,
    }
}
