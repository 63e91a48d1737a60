/// Browser runtime for the push channel, inlined into the development
/// document. Handles `style` (swap, insert or drop a `<link data-kiln-style>`),
/// `reload` and `error` (overlay) events.
pub fn client_script(hmr_port: u16) -> String {
    format!(
        r#"(function() {{
    'use strict';

    const HMR_URL = `ws://${{location.hostname || 'localhost'}}:{port}`;
    const OVERLAY_ID = '__kiln_error_overlay__';

    class KilnHotClient {{
        constructor() {{
            this.ws = null;
            this.reconnectAttempts = 0;
            this.maxReconnectAttempts = 10;
            this.reconnectDelay = 1000;
            this.connect();
        }}

        connect() {{
            try {{
                this.ws = new WebSocket(HMR_URL);
            }} catch (error) {{
                console.warn('[kiln] Connection failed:', error);
                this.scheduleReconnect();
                return;
            }}

            this.ws.onopen = () => {{
                this.reconnectAttempts = 0;
            }};

            this.ws.onmessage = (event) => {{
                try {{
                    this.handle(JSON.parse(event.data));
                }} catch (error) {{
                    console.warn('[kiln] Invalid push message:', error);
                }}
            }};

            this.ws.onclose = () => this.scheduleReconnect();
        }}

        handle(event) {{
            switch (event.type) {{
                case 'connected':
                    console.log('[kiln] Connected to development server');
                    break;
                case 'style':
                    this.hideErrorOverlay();
                    this.replaceStyle(event);
                    break;
                case 'reload':
                    this.hideErrorOverlay();
                    window.location.reload();
                    break;
                case 'error':
                    this.showErrorOverlay(event.message || 'Build failed');
                    break;
                default:
                    console.log('[kiln] Unknown push event:', event.type);
            }}
        }}

        replaceStyle(event) {{
            const links = Array.from(document.querySelectorAll('link[data-kiln-style]'));
            const find = (url) => links.find((link) => new URL(link.href, location.href).pathname === url);
            const current = find(event.target);

            if (event.removed) {{
                if (current) {{
                    current.remove();
                }}
                return;
            }}

            if (!current) {{
                this.insertStyle(event, find(event.before), links);
                return;
            }}

            // Load the new sheet before dropping the old one to avoid a flash
            const next = current.cloneNode();
            next.href = `${{event.target}}?t=${{Date.now()}}`;
            next.onload = () => current.remove();
            next.onerror = () => window.location.reload();
            current.parentNode.insertBefore(next, current.nextSibling);
        }}

        // A sheet the page has not loaded yet, e.g. from a new @import
        insertStyle(event, anchor, links) {{
            const link = document.createElement('link');
            link.rel = 'stylesheet';
            link.href = event.target;
            link.setAttribute('data-kiln-style', event.target.split('/').pop().replace(/\.css$/, ''));
            link.onerror = () => window.location.reload();

            if (anchor) {{
                anchor.parentNode.insertBefore(link, anchor);
            }} else if (links.length > 0) {{
                const last = links[links.length - 1];
                last.parentNode.insertBefore(link, last.nextSibling);
            }} else {{
                document.head.appendChild(link);
            }}
        }}

        scheduleReconnect() {{
            if (this.reconnectAttempts >= this.maxReconnectAttempts) {{
                console.warn('[kiln] Giving up on the development server');
                return;
            }}
            this.reconnectAttempts++;
            setTimeout(() => this.connect(), this.reconnectDelay * this.reconnectAttempts);
        }}

        showErrorOverlay(errorMessage) {{
            this.hideErrorOverlay();

            const overlay = document.createElement('div');
            overlay.id = OVERLAY_ID;
            overlay.style.cssText = `
                position: fixed;
                inset: 0;
                background: rgba(0, 0, 0, 0.9);
                color: #ff5555;
                font-family: 'Menlo', 'Monaco', 'Courier New', monospace;
                font-size: 14px;
                padding: 20px;
                box-sizing: border-box;
                z-index: 999999;
                overflow: auto;
            `;

            const header = document.createElement('h2');
            header.style.cssText = 'margin: 0 0 20px 0; font-size: 24px;';
            header.textContent = 'Build failed';

            const message = document.createElement('pre');
            message.style.cssText = `
                white-space: pre-wrap;
                background: rgba(255, 255, 255, 0.05);
                padding: 15px;
                border-left: 4px solid #ff5555;
                margin: 0;
                line-height: 1.5;
            `;
            message.textContent = errorMessage;

            const tip = document.createElement('p');
            tip.style.cssText = 'margin: 20px 0 0 0; color: #888; font-size: 12px;';
            tip.textContent = 'The last good build is still being served. Fix the error and save to continue.';

            overlay.appendChild(header);
            overlay.appendChild(message);
            overlay.appendChild(tip);
            document.body.appendChild(overlay);
        }}

        hideErrorOverlay() {{
            const overlay = document.getElementById(OVERLAY_ID);
            if (overlay) {{
                overlay.remove();
            }}
        }}
    }}

    if (typeof window !== 'undefined' && !window.__KILN_HOT__) {{
        window.__KILN_HOT__ = new KilnHotClient();
    }}
}})();
"#,
        port = hmr_port
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_targets_push_port() {
        let script = client_script(8001);
        assert!(script.contains(":8001`"));
        assert!(script.contains("case 'style':"));
        assert!(script.contains("link[data-kiln-style]"));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn test_client_inserts_and_drops_stylesheets() {
        let script = client_script(8001);
        assert!(script.contains("if (event.removed) {"));
        assert!(script.contains("this.insertStyle(event, find(event.before), links);"));
        assert!(script.contains("anchor.parentNode.insertBefore(link, anchor);"));
        assert!(script.contains(r"replace(/\.css$/, '')"));
    }
}
