use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::CapabilityError;
use crate::hw::{
    CharacteristicHandle, CharacteristicInfo, CharacteristicProperty, ServiceInfo,
};
use crate::profile::{EndpointId, ProfileDescriptor};

/// Characteristic handles resolved for a supported peripheral.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) struct ResolvedHandles {
    pub(crate) telemetry: CharacteristicHandle,
    pub(crate) control: CharacteristicHandle,
}

/// Checks the discovered service tree against `profile`.
#[instrument(skip_all, level = "debug", fields(service_count = services.len()))]
pub(crate) fn validate_capabilities(
    profile: &ProfileDescriptor,
    services: &[ServiceInfo],
) -> Result<ResolvedHandles, CapabilityError> {
    let service_uuid = profile.service();
    let Some(service) = services
        .iter()
        .find(|service| service.uuid() == service_uuid)
    else {
        return Err(CapabilityError::ServiceMissing {
            service: service_uuid,
        });
    };

    let telemetry = find_endpoint(service, profile, EndpointId::Telemetry)?;
    let control = find_endpoint(service, profile, EndpointId::Control)?;

    if !control.supports(CharacteristicProperty::Write) {
        return Err(CapabilityError::PropertyMismatch {
            endpoint: EndpointId::Control,
            uuid: control.uuid(),
            required: CharacteristicProperty::Write,
        });
    }
    if !telemetry.supports(CharacteristicProperty::Notify) {
        debug!(
            uuid = %telemetry.uuid(),
            "telemetry characteristic does not advertise notify"
        );
    }

    Ok(ResolvedHandles {
        telemetry: CharacteristicHandle::new(service_uuid, telemetry.uuid()),
        control: CharacteristicHandle::new(service_uuid, control.uuid()),
    })
}

fn find_endpoint<'a>(
    service: &'a ServiceInfo,
    profile: &ProfileDescriptor,
    endpoint: EndpointId,
) -> Result<&'a CharacteristicInfo, CapabilityError> {
    let uuid: Uuid = profile.uuid_for(endpoint);
    service
        .characteristic(uuid)
        .ok_or(CapabilityError::CharacteristicMissing { endpoint, uuid })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::complete_service_tree;
    use crate::profile::{BLINKY_CONTROL_UUID, BLINKY_SERVICE_UUID, BLINKY_TELEMETRY_UUID};

    fn tree(service: Uuid, characteristics: Vec<CharacteristicInfo>) -> Vec<ServiceInfo> {
        vec![ServiceInfo::new(service, true, characteristics)]
    }

    fn telemetry() -> CharacteristicInfo {
        CharacteristicInfo::new(
            BLINKY_TELEMETRY_UUID,
            vec![CharacteristicProperty::Read, CharacteristicProperty::Notify],
        )
    }

    #[test]
    fn complete_tree_resolves_both_handles() {
        let profile = ProfileDescriptor::blinky();
        let handles = validate_capabilities(&profile, &complete_service_tree(&profile))
            .expect("complete tree should validate");

        assert_eq!(BLINKY_TELEMETRY_UUID, handles.telemetry.uuid());
        assert_eq!(BLINKY_CONTROL_UUID, handles.control.uuid());
        assert_eq!(BLINKY_SERVICE_UUID, handles.control.service());
    }

    #[rstest]
    #[case::no_services(Vec::new())]
    #[case::wrong_service(tree(crate::profile::NORDIC_LBS_SERVICE_UUID, vec![telemetry()]))]
    fn missing_service_is_rejected(#[case] services: Vec<ServiceInfo>) {
        let result = validate_capabilities(&ProfileDescriptor::blinky(), &services);
        assert_matches!(
            result,
            Err(CapabilityError::ServiceMissing { service }) if service == BLINKY_SERVICE_UUID
        );
    }

    #[test]
    fn missing_control_is_rejected() {
        let services = tree(BLINKY_SERVICE_UUID, vec![telemetry()]);
        let result = validate_capabilities(&ProfileDescriptor::blinky(), &services);
        assert_matches!(
            result,
            Err(CapabilityError::CharacteristicMissing {
                endpoint: EndpointId::Control,
                ..
            })
        );
    }

    #[test]
    fn missing_telemetry_is_rejected() {
        let services = tree(
            BLINKY_SERVICE_UUID,
            vec![CharacteristicInfo::new(
                BLINKY_CONTROL_UUID,
                vec![CharacteristicProperty::Write],
            )],
        );
        let result = validate_capabilities(&ProfileDescriptor::blinky(), &services);
        assert_matches!(
            result,
            Err(CapabilityError::CharacteristicMissing {
                endpoint: EndpointId::Telemetry,
                ..
            })
        );
    }

    #[rstest]
    #[case(vec![CharacteristicProperty::Read])]
    #[case(vec![CharacteristicProperty::WriteWithoutResponse])]
    fn control_without_write_is_rejected(#[case] properties: Vec<CharacteristicProperty>) {
        let services = tree(
            BLINKY_SERVICE_UUID,
            vec![
                telemetry(),
                CharacteristicInfo::new(BLINKY_CONTROL_UUID, properties),
            ],
        );
        let result = validate_capabilities(&ProfileDescriptor::blinky(), &services);
        assert_matches!(
            result,
            Err(CapabilityError::PropertyMismatch {
                endpoint: EndpointId::Control,
                required: CharacteristicProperty::Write,
                ..
            })
        );
    }

    #[test]
    fn telemetry_without_notify_is_accepted() {
        let services = tree(
            BLINKY_SERVICE_UUID,
            vec![
                CharacteristicInfo::new(BLINKY_TELEMETRY_UUID, vec![CharacteristicProperty::Read]),
                CharacteristicInfo::new(BLINKY_CONTROL_UUID, vec![CharacteristicProperty::Write]),
            ],
        );
        assert_matches!(
            validate_capabilities(&ProfileDescriptor::blinky(), &services),
            Ok(_)
        );
    }
}
