//! Capability flags negotiated in the MMS Initiate exchange.
//!
//! Both sets travel as bit strings where the bit offset is the flag's
//! discriminant.

use crate::ber;

macro_rules! capability_flags {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($bits:expr) {
            $($variant:ident = $offset:expr => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u8)]
        pub enum $name {
            $(
                #[doc = $label]
                $variant = $offset,
            )+
        }

        impl $name {
            /// Bit string length in bits.
            pub const BIT_COUNT: usize = $bits;

            /// Every defined flag, in bit order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Flag at bit `offset`, if defined.
            pub fn from_offset(offset: usize) -> Option<Self> {
                Self::ALL.iter().copied().find(|f| f.offset() == offset)
            }

            /// Bit offset.
            #[inline]
            pub const fn offset(self) -> usize {
                self as usize
            }

            /// ISO 9506 name.
            pub const fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $label,)+
                }
            }

            /// Pack a set of flags into bit-string content and unused-bit count.
            pub fn encode_set(flags: &[Self]) -> (Vec<u8>, u8) {
                ber::encode_bit_offsets(flags.iter().map(|f| f.offset()), Self::BIT_COUNT)
            }

            /// Unpack bit-string content, dropping offsets without a flag.
            pub fn decode_set(bits: &[u8], unused: u8) -> Vec<Self> {
                ber::decode_bit_offsets(bits, unused)
                    .into_iter()
                    .filter_map(Self::from_offset)
                    .collect()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

capability_flags! {
    /// ParameterSupportOptions (paramCBB).
    pub enum ParameterCbb (11) {
        Str1 = 0 => "str1",
        Str2 = 1 => "str2",
        Vnam = 2 => "vnam",
        Valt = 3 => "valt",
        Vadr = 4 => "vadr",
        Vsca = 5 => "vsca",
        Tpy = 6 => "tpy",
        Vlis = 7 => "vlis",
        Real = 8 => "real",
        Cei = 10 => "cei",
    }
}

impl ParameterCbb {
    /// Parameters a client proposes by default.
    pub const CLIENT_DEFAULT: &'static [Self] = &[
        Self::Str1,
        Self::Str2,
        Self::Vnam,
        Self::Valt,
        Self::Vlis,
    ];
}

capability_flags! {
    /// ServiceSupportOptions.
    pub enum ServiceSupported (85) {
        Status = 0 => "status",
        GetNameList = 1 => "getNameList",
        Identify = 2 => "identify",
        Rename = 3 => "rename",
        Read = 4 => "read",
        Write = 5 => "write",
        GetVariableAccessAttributes = 6 => "getVariableAccessAttributes",
        DefineNamedVariable = 7 => "defineNamedVariable",
        DefineScatteredAccess = 8 => "defineScatteredAccess",
        GetScatteredAccessAttributes = 9 => "getScatteredAccessAttributes",
        DeleteVariableAccess = 10 => "deleteVariableAccess",
        DefineNamedVariableList = 11 => "defineNamedVariableList",
        GetNamedVariableListAttributes = 12 => "getNamedVariableListAttributes",
        DeleteNamedVariableList = 13 => "deleteNamedVariableList",
        DefineNamedType = 14 => "defineNamedType",
        GetNamedTypeAttributes = 15 => "getNamedTypeAttributes",
        DeleteNamedType = 16 => "deleteNamedType",
        Input = 17 => "input",
        Output = 18 => "output",
        TakeControl = 19 => "takeControl",
        RelinquishControl = 20 => "relinquishControl",
        DefineSemaphore = 21 => "defineSemaphore",
        DeleteSemaphore = 22 => "deleteSemaphore",
        ReportSemaphoreStatus = 23 => "reportSemaphoreStatus",
        ReportPoolSemaphoreStatus = 24 => "reportPoolSemaphoreStatus",
        ReportSemaphoreEntryStatus = 25 => "reportSemaphoreEntryStatus",
        InitiateDownloadSequence = 26 => "initiateDownloadSequence",
        DownloadSegment = 27 => "downloadSegment",
        TerminateDownloadSequence = 28 => "terminateDownloadSequence",
        InitiateUploadSequence = 29 => "initiateUploadSequence",
        UploadSegment = 30 => "uploadSegment",
        TerminateUploadSequence = 31 => "terminateUploadSequence",
        RequestDomainDownload = 32 => "requestDomainDownload",
        RequestDomainUpload = 33 => "requestDomainUpload",
        LoadDomainContent = 34 => "loadDomainContent",
        StoreDomainContent = 35 => "storeDomainContent",
        DeleteDomain = 36 => "deleteDomain",
        GetDomainAttributes = 37 => "getDomainAttributes",
        CreateProgramInvocation = 38 => "createProgramInvocation",
        DeleteProgramInvocation = 39 => "deleteProgramInvocation",
        Start = 40 => "start",
        Stop = 41 => "stop",
        Resume = 42 => "resume",
        Reset = 43 => "reset",
        Kill = 44 => "kill",
        GetProgramInvocationAttributes = 45 => "getProgramInvocationAttributes",
        ObtainFile = 46 => "obtainFile",
        DefineEventCondition = 47 => "defineEventCondition",
        DeleteEventCondition = 48 => "deleteEventCondition",
        GetEventConditionAttributes = 49 => "getEventConditionAttributes",
        ReportEventConditionStatus = 50 => "reportEventConditionStatus",
        AlterEventConditionMonitoring = 51 => "alterEventConditionMonitoring",
        TriggerEvent = 52 => "triggerEvent",
        DefineEventAction = 53 => "defineEventAction",
        DeleteEventAction = 54 => "deleteEventAction",
        GetEventActionAttributes = 55 => "getEventActionAttributes",
        ReportEventActionStatus = 56 => "reportEventActionStatus",
        DefineEventEnrollment = 57 => "defineEventEnrollment",
        DeleteEventEnrollment = 58 => "deleteEventEnrollment",
        AlterEventEnrollment = 59 => "alterEventEnrollment",
        ReportEventEnrollmentStatus = 60 => "reportEventEnrollmentStatus",
        GetEventEnrollmentAttributes = 61 => "getEventEnrollmentAttributes",
        AcknowledgeEventNotification = 62 => "acknowledgeEventNotification",
        GetAlarmSummary = 63 => "getAlarmSummary",
        GetAlarmEnrollmentSummary = 64 => "getAlarmEnrollmentSummary",
        ReadJournal = 65 => "readJournal",
        WriteJournal = 66 => "writeJournal",
        InitializeJournal = 67 => "initializeJournal",
        ReportJournalStatus = 68 => "reportJournalStatus",
        CreateJournal = 69 => "createJournal",
        DeleteJournal = 70 => "deleteJournal",
        GetCapabilityList = 71 => "getCapabilityList",
        FileOpen = 72 => "fileOpen",
        FileRead = 73 => "fileRead",
        FileClose = 74 => "fileClose",
        FileRename = 75 => "fileRename",
        FileDelete = 76 => "fileDelete",
        FileDirectory = 77 => "fileDirectory",
        UnsolicitedStatus = 78 => "unsolicitedStatus",
        InformationReport = 79 => "informationReport",
        EventNotification = 80 => "eventNotification",
        AttachToEventCondition = 81 => "attachToEventCondition",
        AttachToSemaphore = 82 => "attachToSemaphore",
        Conclude = 83 => "conclude",
        Cancel = 84 => "cancel",
    }
}

impl ServiceSupported {
    /// Services a client proposes by default.
    pub const CLIENT_DEFAULT: &'static [Self] = &[
        Self::Status,
        Self::GetNameList,
        Self::Identify,
        Self::Read,
        Self::Write,
        Self::GetVariableAccessAttributes,
        Self::DefineNamedVariableList,
        Self::GetNamedVariableListAttributes,
        Self::DeleteNamedVariableList,
        Self::GetDomainAttributes,
        Self::Kill,
        Self::ReadJournal,
        Self::WriteJournal,
        Self::InitializeJournal,
        Self::ReportJournalStatus,
        Self::GetCapabilityList,
        Self::FileOpen,
        Self::FileRead,
        Self::FileClose,
        Self::FileDelete,
        Self::FileDirectory,
        Self::UnsolicitedStatus,
        Self::InformationReport,
        Self::Conclude,
        Self::Cancel,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_cbb_default_encoding() {
        let (bits, unused) = ParameterCbb::encode_set(ParameterCbb::CLIENT_DEFAULT);
        assert_eq!(bits, vec![0xF1, 0x00]);
        assert_eq!(unused, 5);
    }

    #[test]
    fn test_services_default_encoding() {
        let (bits, unused) = ServiceSupported::encode_set(ServiceSupported::CLIENT_DEFAULT);
        assert_eq!(
            bits,
            vec![0xEE, 0x1C, 0x00, 0x00, 0x04, 0x08, 0x00, 0x00, 0x79, 0xEF, 0x18]
        );
        assert_eq!(unused, 3);
        assert_eq!(
            ServiceSupported::decode_set(&bits, unused),
            ServiceSupported::CLIENT_DEFAULT
        );
    }

    #[test]
    fn test_decode_ignores_undefined_bits() {
        // bit 9 is not a parameter flag
        let flags = ParameterCbb::decode_set(&[0x80, 0x60], 5);
        assert_eq!(flags, vec![ParameterCbb::Str1, ParameterCbb::Cei]);
    }

    #[test]
    fn test_all_flags_in_order() {
        assert_eq!(ServiceSupported::ALL.len(), 85);
        for (i, flag) in ServiceSupported::ALL.iter().enumerate() {
            assert_eq!(flag.offset(), i);
            assert_eq!(ServiceSupported::from_offset(i), Some(*flag));
        }
        assert_eq!(ServiceSupported::from_offset(85), None);
        assert_eq!(ParameterCbb::from_offset(9), None);
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(ServiceSupported::Kill.to_string(), "kill");
        assert_eq!(ServiceSupported::Kill.offset(), 44);
        assert_eq!(ParameterCbb::Vlis.name(), "vlis");
    }
}
