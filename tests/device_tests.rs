//! Integration tests for the device transfer engine
//!
//! Drives the public `Device` surface against the recording mock backend:
//! endpoint routing, lazy interface association, transfer validation and
//! dispatch, and device lifecycle.

use std::sync::Arc;

use usb_engine::testing::{MOCK_STATUS_NOT_FOUND, MockBackend, MockCall};
use usb_engine::{Device, Error, SetupPacket};

/// Open a device and drop the open/initialize noise from the call log.
fn open(backend: &Arc<MockBackend>) -> Device<MockBackend> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let device = Device::open(backend.clone(), r"\\?\usb#vid_1234&pid_5678#mock").unwrap();
    backend.clear_calls();
    device
}

fn two_interface_backend() -> Arc<MockBackend> {
    Arc::new(
        MockBackend::new()
            .with_interface(0, &[0x81])
            .with_interface(1, &[0x02]),
    )
}

mod routing {
    use super::*;

    #[test]
    fn test_every_declared_endpoint_routes_to_its_interface() {
        let backend = Arc::new(
            MockBackend::new()
                .with_interface(0, &[0x81, 0x01])
                .with_interface(1, &[0x82])
                .with_interface(2, &[0x03]),
        );
        let device = open(&backend);
        let mut buffer = [0u8; 8];

        device.pipe_transfer(0x81, &mut buffer, 0, 8).unwrap();
        device.pipe_transfer(0x01, &mut buffer, 0, 8).unwrap();
        device.pipe_transfer(0x82, &mut buffer, 0, 8).unwrap();
        device.pipe_transfer(0x03, &mut buffer, 0, 8).unwrap();

        let transfers: Vec<(u8, u8)> = backend
            .calls()
            .iter()
            .filter_map(|c| match c {
                MockCall::ReadPipe {
                    interface,
                    endpoint,
                    ..
                }
                | MockCall::WritePipe {
                    interface,
                    endpoint,
                    ..
                } => Some((*interface, *endpoint)),
                _ => None,
            })
            .collect();
        assert_eq!(transfers, vec![(0, 0x81), (0, 0x01), (1, 0x82), (2, 0x03)]);
    }

    #[test]
    fn test_in_endpoint_reads_and_out_endpoint_writes() {
        let backend = Arc::new(MockBackend::new().with_interface(0, &[0x81, 0x01]));
        let device = open(&backend);
        let mut buffer = [0u8; 16];

        device.pipe_transfer(0x81, &mut buffer, 0, 16).unwrap();
        device.pipe_transfer(0x01, &mut buffer, 0, 16).unwrap();

        assert!(matches!(
            backend.calls()[0],
            MockCall::ReadPipe {
                endpoint: 0x81,
                length: 16,
                ..
            }
        ));
        assert!(matches!(
            &backend.calls()[1],
            MockCall::WritePipe { endpoint: 0x01, .. }
        ));
    }

    #[test]
    fn test_unregistered_endpoint_issues_no_native_call() {
        let backend = Arc::new(MockBackend::new().with_interface(0, &[0x81]));
        let device = open(&backend);
        let mut buffer = [0u8; 64];

        let err = device.pipe_transfer(0x82, &mut buffer, 0, 64).unwrap_err();
        assert_eq!(err, Error::UnknownEndpoint(0x82));

        // Same number, other direction.
        let err = device.pipe_transfer(0x01, &mut buffer, 0, 64).unwrap_err();
        assert_eq!(err, Error::UnknownEndpoint(0x01));

        assert!(backend.calls().is_empty());
    }
}

mod interface_claiming {
    use super::*;

    #[test]
    fn test_claim_and_release_interface_zero_are_no_ops() {
        let backend = two_interface_backend();
        let device = open(&backend);

        device.claim_interface(0).unwrap();
        device.claim_interface(0).unwrap();
        device.release_interface(0);
        device.release_interface(0);

        assert!(backend.calls().is_empty());

        // The root handle is still usable afterwards.
        let mut buffer = [0u8; 4];
        device.pipe_transfer(0x81, &mut buffer, 0, 4).unwrap();
    }

    #[test]
    fn test_claim_requests_association_at_position_id_minus_one() {
        let backend = two_interface_backend();
        let device = open(&backend);

        device.claim_interface(1).unwrap();

        assert_eq!(
            backend.calls(),
            vec![MockCall::AssociatedInterface { position: 0 }]
        );
    }

    #[test]
    fn test_claim_is_cached_after_first_use() {
        let backend = two_interface_backend();
        let device = open(&backend);

        device.claim_interface(1).unwrap();
        device.claim_interface(1).unwrap();
        let mut buffer = [0u8; 4];
        device.pipe_transfer(0x02, &mut buffer, 0, 4).unwrap();

        assert_eq!(backend.association_requests(), 1);
    }

    #[test]
    fn test_claim_out_of_range() {
        let backend = two_interface_backend();
        let device = open(&backend);

        assert_eq!(
            device.claim_interface(256).unwrap_err(),
            Error::InvalidInterface(256)
        );
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_concurrent_first_claims_associate_once() {
        let backend = two_interface_backend();
        let device = open(&backend);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| device.claim_interface(1).unwrap());
            }
        });

        assert_eq!(backend.association_requests(), 1);
    }

    #[test]
    fn test_association_failure_carries_native_status() {
        let backend = two_interface_backend();
        let device = open(&backend);
        backend.fail_association(0, -5);

        assert_eq!(
            device.claim_interface(1).unwrap_err(),
            Error::InterfaceAssociation { id: 1, status: -5 }
        );
    }

    #[test]
    fn test_claim_undeclared_interface_fails() {
        let backend = two_interface_backend();
        let device = open(&backend);

        assert_eq!(
            device.claim_interface(4).unwrap_err(),
            Error::InterfaceAssociation {
                id: 4,
                status: MOCK_STATUS_NOT_FOUND
            }
        );
    }

    #[test]
    fn test_release_drops_the_native_handle() {
        let backend = two_interface_backend();
        let device = open(&backend);

        device.claim_interface(1).unwrap();
        device.release_interface(1);

        assert!(
            backend
                .calls()
                .contains(&MockCall::ReleaseInterface { interface: 1 })
        );

        // Releasing an unclaimed interface stays silent.
        backend.clear_calls();
        device.release_interface(3);
        assert!(backend.calls().is_empty());
    }
}

mod control_transfers {
    use super::*;

    #[test]
    fn test_setup_packet_reaches_the_backend() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 18];

        device
            .control_transfer(0x80, 0x06, 0x0100, 0x0000, &mut buffer, 0, 18)
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![MockCall::ControlTransfer {
                interface: 0,
                setup: SetupPacket {
                    request_type: 0x80,
                    request: 0x06,
                    value: 0x0100,
                    index: 0x0000,
                    length: 18,
                },
            }]
        );
    }

    #[test]
    fn test_recipient_interface_targets_interface_from_index() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 8];

        // Class request, recipient = interface, wIndex = 1.
        device
            .control_transfer(0xA1, 0x01, 0, 0x0001, &mut buffer, 0, 8)
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![
                MockCall::AssociatedInterface { position: 0 },
                MockCall::ControlTransfer {
                    interface: 1,
                    setup: SetupPacket {
                        request_type: 0xA1,
                        request: 0x01,
                        value: 0,
                        index: 0x0001,
                        length: 8,
                    },
                },
            ]
        );
    }

    #[test]
    fn test_recipient_interface_association_happens_once() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 8];

        for _ in 0..3 {
            device
                .control_transfer(0xA1, 0x01, 0, 0x0001, &mut buffer, 0, 8)
                .unwrap();
        }

        assert_eq!(backend.association_requests(), 1);
    }

    #[test]
    fn test_recipient_endpoint_routes_through_the_router() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 2];

        // CLEAR_FEATURE(ENDPOINT_HALT) on endpoint 0x02, declared by
        // interface 1.
        device
            .control_transfer(0x02, 0x01, 0, 0x0002, &mut buffer, 0, 0)
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0], MockCall::AssociatedInterface { position: 0 });
        assert!(matches!(
            calls[1],
            MockCall::ControlTransfer { interface: 1, .. }
        ));
    }

    #[test]
    fn test_recipient_device_and_other_target_interface_zero() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 8];

        device
            .control_transfer(0x80, 0x00, 0, 0, &mut buffer, 0, 2)
            .unwrap();
        device
            .control_transfer(0x23, 0x00, 0, 0, &mut buffer, 0, 2)
            .unwrap();

        assert_eq!(backend.association_requests(), 0);
        for call in backend.calls() {
            assert!(matches!(
                call,
                MockCall::ControlTransfer { interface: 0, .. }
            ));
        }
    }

    #[test]
    fn test_bounds_violations_issue_no_native_call() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 64];

        for (offset, length) in [(0usize, 65usize), (32, 33), (65, 0), (usize::MAX, 2)] {
            let err = device
                .control_transfer(0x80, 0x06, 0, 0, &mut buffer, offset, length)
                .unwrap_err();
            assert!(matches!(err, Error::Bounds { .. }), "({offset}, {length})");
        }

        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_length_above_wire_field_limit_is_rejected() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = vec![0u8; 40000];

        device
            .control_transfer(0x80, 0x06, 0, 0, &mut buffer, 0, 32767)
            .unwrap();

        let err = device
            .control_transfer(0x80, 0x06, 0, 0, &mut buffer, 0, 32768)
            .unwrap_err();
        assert!(matches!(err, Error::Bounds { .. }));
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn test_native_failure_propagates_status() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 8];

        backend.fail_next_transfer(-110);
        let err = device
            .control_transfer(0x80, 0x06, 0, 0, &mut buffer, 0, 8)
            .unwrap_err();
        assert_eq!(err, Error::Transfer(-110));
    }

    #[test]
    fn test_in_transfer_fills_the_requested_region() {
        let backend = two_interface_backend();
        let device = open(&backend);
        backend.set_read_data(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let mut buffer = [0u8; 10];
        let transferred = device
            .control_transfer(0x80, 0x06, 0, 0, &mut buffer, 2, 8)
            .unwrap();

        assert_eq!(transferred, 4);
        assert_eq!(&buffer[..8], &[0, 0, 0xDE, 0xAD, 0xBE, 0xEF, 0, 0]);
    }
}

mod pipe_transfers {
    use super::*;

    #[test]
    fn test_out_transfer_sends_the_region() {
        let backend = two_interface_backend();
        let device = open(&backend);

        let mut buffer = *b"....payload.";
        let transferred = device.pipe_transfer(0x02, &mut buffer, 4, 7).unwrap();

        assert_eq!(transferred, 7);
        let calls = backend.calls();
        assert!(matches!(
            &calls[..],
            [
                MockCall::AssociatedInterface { position: 0 },
                MockCall::WritePipe {
                    interface: 1,
                    endpoint: 0x02,
                    data,
                }
            ] if data == b"payload"
        ));
    }

    #[test]
    fn test_bounds_checked_before_resolution() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 16];

        // Even an unknown endpoint reports the bounds violation first and
        // touches nothing.
        let err = device.pipe_transfer(0x7F, &mut buffer, 8, 9).unwrap_err();
        assert!(matches!(err, Error::Bounds { .. }));
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_transfer_error_propagates_status() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 16];

        backend.fail_next_transfer(-32);
        assert_eq!(
            device.pipe_transfer(0x81, &mut buffer, 0, 16).unwrap_err(),
            Error::Transfer(-32)
        );
    }

    #[test]
    fn test_short_transfer_reports_actual_length() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 16];

        backend.set_next_transfer_length(3);
        assert_eq!(device.pipe_transfer(0x02, &mut buffer, 0, 16).unwrap(), 3);
    }
}

mod descriptor_reads {
    use super::*;

    #[test]
    fn test_descriptor_read_targets_interface_zero() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 18];

        device
            .get_descriptor(0x01, 0, 0x0409, &mut buffer, 0, 18)
            .unwrap();

        assert_eq!(
            backend.calls(),
            vec![MockCall::GetDescriptor {
                interface: 0,
                descriptor_type: 0x01,
                index: 0,
                language_id: 0x0409,
            }]
        );
    }

    #[test]
    fn test_descriptor_read_is_bounds_checked() {
        let backend = two_interface_backend();
        let device = open(&backend);
        let mut buffer = [0u8; 18];

        let err = device
            .get_descriptor(0x01, 0, 0, &mut buffer, 4, 18)
            .unwrap_err();
        assert!(matches!(err, Error::Bounds { .. }));
        assert!(backend.calls().is_empty());
    }
}

mod pipe_admin {
    use super::*;

    #[test]
    fn test_reset_and_abort_reach_the_owning_interface() {
        let backend = two_interface_backend();
        let device = open(&backend);

        device.pipe_reset(0x81).unwrap();
        device.pipe_abort(0x02).unwrap();

        let calls = backend.calls();
        assert!(calls.contains(&MockCall::ResetPipe {
            interface: 0,
            endpoint: 0x81
        }));
        assert!(calls.contains(&MockCall::AbortPipe {
            interface: 1,
            endpoint: 0x02
        }));
    }

    #[test]
    fn test_native_failures_are_swallowed() {
        let backend = two_interface_backend();
        let device = open(&backend);

        backend.fail_next_pipe_admin(-71);
        device.pipe_reset(0x81).unwrap();

        backend.fail_next_pipe_admin(-71);
        device.pipe_abort(0x81).unwrap();
    }

    #[test]
    fn test_resolution_failures_still_propagate() {
        let backend = two_interface_backend();
        let device = open(&backend);

        assert_eq!(
            device.pipe_reset(0x05).unwrap_err(),
            Error::UnknownEndpoint(0x05)
        );
        assert_eq!(
            device.pipe_abort(0x85).unwrap_err(),
            Error::UnknownEndpoint(0x85)
        );
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_configuration_is_read_only_after_open() {
        let backend = Arc::new(
            MockBackend::new()
                .with_configuration(2)
                .with_interface(0, &[0x81]),
        );
        let device = open(&backend);

        assert_eq!(device.configuration(), 2);
        // Setting the current value is accepted as a no-op.
        device.set_configuration(2).unwrap();
        assert_eq!(
            device.set_configuration(1).unwrap_err(),
            Error::Unsupported("configuration change")
        );
    }

    #[test]
    fn test_device_reset_is_unsupported() {
        let backend = two_interface_backend();
        let device = open(&backend);

        assert_eq!(
            device.reset_device().unwrap_err(),
            Error::Unsupported("device reset")
        );
    }

    #[test]
    fn test_open_failure_carries_native_status() {
        let backend = Arc::new(MockBackend::new().with_interface(0, &[0x81]));
        backend.fail_open(-13);

        let err = Device::open(backend.clone(), "mock").unwrap_err();
        assert_eq!(err, Error::DeviceOpen(-13));

        // A later open is unaffected.
        Device::open(backend, "mock").unwrap();
    }

    #[test]
    fn test_initialize_failure_releases_the_device_handle() {
        let backend = Arc::new(MockBackend::new().with_interface(0, &[0x81]));
        backend.fail_initialize(-9);

        let err = Device::open(backend.clone(), "mock").unwrap_err();
        assert_eq!(err, Error::DeviceOpen(-9));
        assert_eq!(backend.calls().last(), Some(&MockCall::CloseDevice));

        // A later open is unaffected.
        Device::open(backend, "mock").unwrap();
    }

    #[test]
    fn test_device_debug_reports_the_configuration() {
        let backend = Arc::new(
            MockBackend::new()
                .with_configuration(2)
                .with_interface(0, &[0x81]),
        );
        let device = open(&backend);

        assert!(format!("{:?}", device).contains("configuration: 2"));
    }

    #[test]
    fn test_close_releases_interfaces_then_the_device_handle() {
        let backend = two_interface_backend();
        let device = open(&backend);
        device.claim_interface(1).unwrap();
        backend.clear_calls();

        device.close();

        let calls = backend.calls();
        assert_eq!(calls.last(), Some(&MockCall::CloseDevice));
        assert!(calls.contains(&MockCall::ReleaseInterface { interface: 0 }));
        assert!(calls.contains(&MockCall::ReleaseInterface { interface: 1 }));
    }

    #[test]
    fn test_drop_performs_the_same_teardown() {
        let backend = two_interface_backend();
        {
            let device = open(&backend);
            device.claim_interface(1).unwrap();
            backend.clear_calls();
        }

        assert_eq!(backend.calls().last(), Some(&MockCall::CloseDevice));
    }
}
