use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Position of a call in the receptionist workflow. Persisted between turns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Greeting,
    IntentRouting,
    AddressCollection,
    WaitingForAddress,
    WaitingForIntent,
    FrequencyCollection,
    WaitingForFrequency,
    PropertyLookup,
    Quoting,
    WaitingForCallbackNumber,
    WaitingForBookingDecision,
    WaitingForTimeSlot,
    Booking,
    Closing,
    End,
    /// Any persisted value this build does not recognise.
    Unknown,
}

impl Stage {
    pub const ALL: [Stage; 16] = [
        Stage::Greeting,
        Stage::IntentRouting,
        Stage::AddressCollection,
        Stage::WaitingForAddress,
        Stage::WaitingForIntent,
        Stage::FrequencyCollection,
        Stage::WaitingForFrequency,
        Stage::PropertyLookup,
        Stage::Quoting,
        Stage::WaitingForCallbackNumber,
        Stage::WaitingForBookingDecision,
        Stage::WaitingForTimeSlot,
        Stage::Booking,
        Stage::Closing,
        Stage::End,
        Stage::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::IntentRouting => "intent_routing",
            Self::AddressCollection => "address_collection",
            Self::WaitingForAddress => "WAITING_FOR_ADDRESS",
            Self::WaitingForIntent => "WAITING_FOR_INTENT",
            Self::FrequencyCollection => "frequency_collection",
            Self::WaitingForFrequency => "WAITING_FOR_FREQUENCY",
            Self::PropertyLookup => "property_lookup",
            Self::Quoting => "quoting",
            Self::WaitingForCallbackNumber => "WAITING_FOR_CALLBACK_NUMBER",
            Self::WaitingForBookingDecision => "WAITING_FOR_BOOKING_DECISION",
            Self::WaitingForTimeSlot => "WAITING_FOR_TIME_SLOT",
            Self::Booking => "booking",
            Self::Closing => "closing",
            Self::End => "END",
            Self::Unknown => "unknown",
        }
    }

    /// Never fails: unrecognised values become [`Stage::Unknown`].
    pub fn parse(value: &str) -> Self {
        Self::ALL
            .into_iter()
            .find(|stage| *stage != Self::Unknown && stage.as_str() == value.trim())
            .unwrap_or(Self::Unknown)
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            Self::WaitingForAddress
                | Self::WaitingForIntent
                | Self::WaitingForFrequency
                | Self::WaitingForCallbackNumber
                | Self::WaitingForBookingDecision
                | Self::WaitingForTimeSlot
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Unknown)
    }
}

impl Serialize for Stage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Stage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Greeting,
    IntentRouter,
    AddressExtraction,
    FrequencyCollection,
    PropertyLookup,
    QuoteCalculation,
    Booking,
    Closing,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::IntentRouter => "intent_router",
            Self::AddressExtraction => "address_extraction",
            Self::FrequencyCollection => "frequency_collection",
            Self::PropertyLookup => "property_lookup",
            Self::QuoteCalculation => "quote_calculation",
            Self::Booking => "booking",
            Self::Closing => "closing",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    Run(NodeKind),
    Stop,
    Terminal,
}
