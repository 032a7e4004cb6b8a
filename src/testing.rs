//! Mock transport backend for exercising the engine without hardware
//!
//! [`MockBackend`] records every native call in order, supports scripted
//! failures, and can hold asynchronous submissions for manual resolution so
//! tests can observe the pending state of the completion protocol.

use std::sync::{Arc, Mutex};

use crate::backend::{InterfaceDescriptor, NativeStatus, UsbBackend};
use crate::completion::CompletionToken;
use crate::setup::{Direction, SetupPacket};

/// Status used when an associated-interface request has no target
pub const MOCK_STATUS_NOT_FOUND: NativeStatus = -2;

/// One recorded native call, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    OpenDevice {
        path: String,
    },
    Initialize,
    AssociatedInterface {
        position: u8,
    },
    ControlTransfer {
        interface: u8,
        setup: SetupPacket,
    },
    SubmitControlTransfer {
        interface: u8,
        setup: SetupPacket,
    },
    ReadPipe {
        interface: u8,
        endpoint: u8,
        length: usize,
    },
    WritePipe {
        interface: u8,
        endpoint: u8,
        data: Vec<u8>,
    },
    SubmitReadPipe {
        interface: u8,
        endpoint: u8,
    },
    SubmitWritePipe {
        interface: u8,
        endpoint: u8,
        data: Vec<u8>,
    },
    GetDescriptor {
        interface: u8,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
    },
    ResetPipe {
        interface: u8,
        endpoint: u8,
    },
    AbortPipe {
        interface: u8,
        endpoint: u8,
    },
    ReleaseInterface {
        interface: u8,
    },
    CloseDevice,
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

/// Mock device handle; logs its release on drop
pub struct MockDeviceHandle {
    log: CallLog,
}

impl Drop for MockDeviceHandle {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(MockCall::CloseDevice);
    }
}

/// Mock interface handle; logs its release on drop
pub struct MockInterfaceHandle {
    /// Interface number the handle was claimed for
    pub number: u8,
    log: CallLog,
}

impl Drop for MockInterfaceHandle {
    fn drop(&mut self) {
        self.log.lock().unwrap().push(MockCall::ReleaseInterface {
            interface: self.number,
        });
    }
}

#[derive(Default)]
struct MockState {
    /// Scripted failure for the next device open
    open_failure: Option<NativeStatus>,
    /// Scripted failure for the next initialization
    init_failure: Option<NativeStatus>,
    /// Overrides the result of the next transfer (sync or async)
    transfer_result: Option<Result<usize, NativeStatus>>,
    /// Scripted failure for an association position
    association_failure: Option<(u8, NativeStatus)>,
    /// Scripted failure for the next pipe reset/abort
    pipe_admin_failure: Option<NativeStatus>,
    /// Bytes returned by IN transfers and descriptor reads
    read_data: Vec<u8>,
    /// When set, async submissions are held instead of resolved inline
    hold_submissions: bool,
    held: Vec<CompletionToken>,
}

/// Recording mock implementation of [`UsbBackend`]
///
/// By default every operation succeeds: IN transfers return the scripted
/// read data (or the full requested length of zeroes), OUT transfers accept
/// everything, and async submissions complete inline, taking the synchronous
/// completion fast path. Tests opt into failures and held completions per
/// operation.
pub struct MockBackend {
    configuration: u8,
    interfaces: Vec<InterfaceDescriptor>,
    log: CallLog,
    state: Mutex<MockState>,
}

impl MockBackend {
    /// A backend with configuration 1 and no interfaces
    pub fn new() -> Self {
        MockBackend {
            configuration: 1,
            interfaces: Vec::new(),
            log: Arc::new(Mutex::new(Vec::new())),
            state: Mutex::new(MockState::default()),
        }
    }

    /// Declare an interface with the given endpoint addresses
    pub fn with_interface(mut self, number: u8, endpoints: &[u8]) -> Self {
        self.interfaces.push(InterfaceDescriptor {
            number,
            endpoint_addresses: endpoints.to_vec(),
        });
        self
    }

    /// Set the active configuration value
    pub fn with_configuration(mut self, value: u8) -> Self {
        self.configuration = value;
        self
    }

    /// Every native call recorded so far, in order
    pub fn calls(&self) -> Vec<MockCall> {
        self.log.lock().unwrap().clone()
    }

    /// Forget recorded calls (typically right after open)
    pub fn clear_calls(&self) {
        self.log.lock().unwrap().clear();
    }

    /// Number of recorded associated-interface requests
    pub fn association_requests(&self) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::AssociatedInterface { .. }))
            .count()
    }

    /// Fail the next device open with `status`
    pub fn fail_open(&self, status: NativeStatus) {
        self.state.lock().unwrap().open_failure = Some(status);
    }

    /// Fail the next initialization with `status`
    pub fn fail_initialize(&self, status: NativeStatus) {
        self.state.lock().unwrap().init_failure = Some(status);
    }

    /// Fail the next transfer (sync or async) with `status`
    pub fn fail_next_transfer(&self, status: NativeStatus) {
        self.state.lock().unwrap().transfer_result = Some(Err(status));
    }

    /// Make the next transfer report `transferred` bytes
    pub fn set_next_transfer_length(&self, transferred: usize) {
        self.state.lock().unwrap().transfer_result = Some(Ok(transferred));
    }

    /// Fail the association request at `position` with `status`
    pub fn fail_association(&self, position: u8, status: NativeStatus) {
        self.state.lock().unwrap().association_failure = Some((position, status));
    }

    /// Fail the next pipe reset/abort with `status`
    pub fn fail_next_pipe_admin(&self, status: NativeStatus) {
        self.state.lock().unwrap().pipe_admin_failure = Some(status);
    }

    /// Bytes produced by IN transfers and descriptor reads
    pub fn set_read_data(&self, data: &[u8]) {
        self.state.lock().unwrap().read_data = data.to_vec();
    }

    /// Hold async submissions for manual resolution instead of completing
    /// them inline
    pub fn hold_completions(&self) {
        self.state.lock().unwrap().hold_submissions = true;
    }

    /// Number of held submissions awaiting resolution
    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().held.len()
    }

    /// Resolve the oldest held submission with `transferred` bytes
    ///
    /// # Panics
    /// Panics if nothing is held.
    pub fn complete_next(&self, transferred: usize) {
        self.take_held().complete(transferred);
    }

    /// Resolve the oldest held submission by writing `data` into its buffer
    pub fn complete_next_with(&self, data: &[u8]) {
        let token = self.take_held();
        token.buffer()[..data.len()].copy_from_slice(data);
        token.complete(data.len());
    }

    /// Resolve the oldest held submission with a native failure
    pub fn fail_next(&self, status: NativeStatus) {
        self.take_held().fail(status);
    }

    fn take_held(&self) -> CompletionToken {
        let mut state = self.state.lock().unwrap();
        assert!(!state.held.is_empty(), "no held submission to resolve");
        state.held.remove(0)
    }

    fn record(&self, call: MockCall) {
        self.log.lock().unwrap().push(call);
    }

    fn handle(&self, number: u8) -> MockInterfaceHandle {
        MockInterfaceHandle {
            number,
            log: self.log.clone(),
        }
    }

    /// Copy the scripted read data into `data` and return the produced
    /// length; an unset script yields the full region of zeroes.
    fn fill_read(&self, data: &mut [u8]) -> usize {
        let state = self.state.lock().unwrap();
        if state.read_data.is_empty() {
            return data.len();
        }
        let n = state.read_data.len().min(data.len());
        data[..n].copy_from_slice(&state.read_data[..n]);
        n
    }

    fn scripted_transfer(&self) -> Option<Result<usize, NativeStatus>> {
        self.state.lock().unwrap().transfer_result.take()
    }

    /// Resolve or hold an async submission whose data flows device-to-host
    fn finish_in(&self, token: CompletionToken) {
        if let Some(result) = self.scripted_transfer() {
            return match result {
                Ok(n) => token.complete(n),
                Err(status) => token.fail(status),
            };
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.hold_submissions {
                state.held.push(token);
                return;
            }
        }
        let n = {
            let mut region = token.buffer();
            self.fill_read(&mut region)
        };
        token.complete(n);
    }

    /// Resolve or hold an async submission whose data flows host-to-device
    fn finish_out(&self, token: CompletionToken) {
        if let Some(result) = self.scripted_transfer() {
            return match result {
                Ok(n) => token.complete(n),
                Err(status) => token.fail(status),
            };
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.hold_submissions {
                state.held.push(token);
                return;
            }
        }
        let n = token.len();
        token.complete(n);
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbBackend for MockBackend {
    type DeviceHandle = MockDeviceHandle;
    type InterfaceHandle = MockInterfaceHandle;

    fn open_device(&self, path: &str) -> Result<Self::DeviceHandle, NativeStatus> {
        self.record(MockCall::OpenDevice {
            path: path.to_string(),
        });
        if let Some(status) = self.state.lock().unwrap().open_failure.take() {
            return Err(status);
        }
        Ok(MockDeviceHandle {
            log: self.log.clone(),
        })
    }

    fn initialize(
        &self,
        _device: &Self::DeviceHandle,
    ) -> Result<Self::InterfaceHandle, NativeStatus> {
        self.record(MockCall::Initialize);
        if let Some(status) = self.state.lock().unwrap().init_failure.take() {
            return Err(status);
        }
        Ok(self.handle(0))
    }

    fn associated_interface(
        &self,
        _root: &Self::InterfaceHandle,
        position: u8,
    ) -> Result<Self::InterfaceHandle, NativeStatus> {
        self.record(MockCall::AssociatedInterface { position });

        let scripted = self.state.lock().unwrap().association_failure;
        if let Some((failing_position, status)) = scripted
            && failing_position == position
        {
            return Err(status);
        }

        let number = position + 1;
        if self.interfaces.iter().any(|i| i.number == number) {
            Ok(self.handle(number))
        } else {
            Err(MOCK_STATUS_NOT_FOUND)
        }
    }

    fn active_configuration(
        &self,
        _device: &Self::DeviceHandle,
    ) -> Result<(u8, Vec<InterfaceDescriptor>), NativeStatus> {
        Ok((self.configuration, self.interfaces.clone()))
    }

    fn control_transfer(
        &self,
        interface: &Self::InterfaceHandle,
        setup: SetupPacket,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus> {
        self.record(MockCall::ControlTransfer {
            interface: interface.number,
            setup,
        });
        if let Some(result) = self.scripted_transfer() {
            return result;
        }
        match Direction::from_address(setup.request_type) {
            Direction::In => Ok(self.fill_read(data)),
            Direction::Out => Ok(data.len()),
        }
    }

    fn submit_control_transfer(
        &self,
        interface: &Self::InterfaceHandle,
        setup: SetupPacket,
        token: CompletionToken,
    ) {
        self.record(MockCall::SubmitControlTransfer {
            interface: interface.number,
            setup,
        });
        match Direction::from_address(setup.request_type) {
            Direction::In => self.finish_in(token),
            Direction::Out => self.finish_out(token),
        }
    }

    fn read_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus> {
        self.record(MockCall::ReadPipe {
            interface: interface.number,
            endpoint,
            length: data.len(),
        });
        if let Some(result) = self.scripted_transfer() {
            return result;
        }
        Ok(self.fill_read(data))
    }

    fn write_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        data: &[u8],
    ) -> Result<usize, NativeStatus> {
        self.record(MockCall::WritePipe {
            interface: interface.number,
            endpoint,
            data: data.to_vec(),
        });
        if let Some(result) = self.scripted_transfer() {
            return result;
        }
        Ok(data.len())
    }

    fn submit_read_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        token: CompletionToken,
    ) {
        self.record(MockCall::SubmitReadPipe {
            interface: interface.number,
            endpoint,
        });
        self.finish_in(token);
    }

    fn submit_write_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
        token: CompletionToken,
    ) {
        self.record(MockCall::SubmitWritePipe {
            interface: interface.number,
            endpoint,
            data: token.buffer().to_vec(),
        });
        self.finish_out(token);
    }

    fn get_descriptor(
        &self,
        interface: &Self::InterfaceHandle,
        descriptor_type: u8,
        index: u8,
        language_id: u16,
        data: &mut [u8],
    ) -> Result<usize, NativeStatus> {
        self.record(MockCall::GetDescriptor {
            interface: interface.number,
            descriptor_type,
            index,
            language_id,
        });
        if let Some(result) = self.scripted_transfer() {
            return result;
        }
        Ok(self.fill_read(data))
    }

    fn reset_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
    ) -> Result<(), NativeStatus> {
        self.record(MockCall::ResetPipe {
            interface: interface.number,
            endpoint,
        });
        match self.state.lock().unwrap().pipe_admin_failure.take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn abort_pipe(
        &self,
        interface: &Self::InterfaceHandle,
        endpoint: u8,
    ) -> Result<(), NativeStatus> {
        self.record(MockCall::AbortPipe {
            interface: interface.number,
            endpoint,
        });
        match self.state.lock().unwrap().pipe_admin_failure.take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }
}
